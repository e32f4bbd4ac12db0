//! Substrate stepping: seed, treat, advance
//!
//! The substrate is the only code that mutates a [`VesselState`]. It draws
//! from the growth and treatment streams and never from the assay stream,
//! so how often a vessel is measured cannot change its trajectory.

use tracing::{debug, warn};

use crate::core::config::SubstrateConfig;
use crate::core::error::{AccountingViolation, LabError, Result};
use crate::core::types::{Hours, VesselId};
use crate::simulation::biology::BiologyTable;
use crate::simulation::rng::RngStreams;
use crate::simulation::vessel::{DeathPartition, Exposure, Vessel, VesselState};

/// Owns the biology table and stepping rules for every vessel it creates
#[derive(Debug, Clone)]
pub struct Substrate {
    biology: BiologyTable,
    config: SubstrateConfig,
    base_seed: u64,
}

impl Substrate {
    pub fn new(biology: BiologyTable, config: SubstrateConfig, base_seed: u64) -> Self {
        Self {
            biology,
            config,
            base_seed,
        }
    }

    pub fn biology(&self) -> &BiologyTable {
        &self.biology
    }

    pub fn config(&self) -> &SubstrateConfig {
        &self.config
    }

    /// Create a vessel at time zero
    ///
    /// Viability below 1.0 models seeding stress and is booked as `death_unknown`.
    pub fn seed(&self, id: VesselId, cell_line: &str, initial_viability: f64) -> Result<Vessel> {
        self.biology.cell_line(cell_line)?;
        if !(initial_viability > 0.0 && initial_viability <= 1.0) {
            return Err(LabError::InvalidConfig(format!(
                "initial viability {} for {} must be within (0, 1]",
                initial_viability, id
            )));
        }

        let seeding_loss = 1.0 - initial_viability;
        if seeding_loss > self.config.seeding_stress_baseline {
            warn!(
                vessel = %id,
                seeding_loss,
                baseline = self.config.seeding_stress_baseline,
                "Seeding stress above baseline"
            );
        }

        let streams = RngStreams::derive(self.base_seed, &id);
        let state = VesselState {
            id,
            cell_line: cell_line.to_string(),
            time_h: 0.0,
            viability: initial_viability,
            death: DeathPartition {
                compound: 0.0,
                confluence: 0.0,
                unknown: seeding_loss,
            },
            confluence: self.config.initial_confluence,
            exposures: Vec::new(),
            dysfunction: 0.0,
        };

        Ok(Vessel {
            state,
            streams,
            growth_tick: None,
        })
    }

    /// Expose the vessel to `dose_um` of `compound` at `time_h`
    ///
    /// Advances to `time_h` first if it lies ahead. The instant viability
    /// drop is booked to `death_compound`.
    pub fn treat(
        &self,
        vessel: &mut Vessel,
        compound: &str,
        dose_um: f64,
        time_h: Hours,
    ) -> Result<Option<AccountingViolation>> {
        let params = self.biology.compound(compound)?;
        let line = self.biology.cell_line(&vessel.state.cell_line)?;
        if !(dose_um.is_finite() && dose_um >= 0.0) {
            return Err(LabError::InvalidParameter {
                compound: compound.to_string(),
                parameter: "dose_um",
                value: dose_um,
            });
        }
        if time_h < vessel.state.time_h {
            return Err(LabError::InvalidConfig(format!(
                "cannot treat {} at {}h, vessel is already at {}h",
                vessel.state.id, time_h, vessel.state.time_h
            )));
        }

        let mut violation = None;
        if time_h > vessel.state.time_h {
            violation = self.advance(vessel, time_h - vessel.state.time_h);
        }

        let potency = params.potency(dose_um);
        let jitter = vessel
            .streams
            .treatment
            .lognormal_factor(self.config.attrition_jitter);

        let state = &mut vessel.state;
        let kill = params.instant_kill_max * potency;
        let before = state.viability;
        state.viability = before * (1.0 - kill);
        state.death.compound += before - state.viability;

        state.exposures.push(Exposure {
            compound: params.id.clone(),
            stress_axis: params.stress_axis,
            dose_um,
            dose_multiplier: params.dose_multiplier(dose_um),
            start_h: time_h,
            target_dysfunction: (potency * line.sensitivity).min(1.0),
            tau_h: params.dysfunction_tau_h,
            attrition_rate_per_h: params.attrition_rate_per_h * jitter,
        });

        debug!(
            vessel = %state.id,
            compound,
            dose_um,
            potency,
            instant_kill = kill,
            viability = state.viability,
            "Treated vessel"
        );

        Ok(self.reconcile(state).or(violation))
    }

    /// Advance simulated time by `dt_h`
    ///
    /// Integrates on a grid of `integration_step_h` ticks anchored at time
    /// zero. Each tick draws its growth jitter once, the first time any part
    /// of it is simulated, and reconciles the partition at its end. Callers
    /// that stop on grid points therefore get the same bits whether they
    /// advance in one call or many. Confluence is capped at 1.0 and only
    /// kills when confluence death is enabled.
    pub fn advance(&self, vessel: &mut Vessel, dt_h: Hours) -> Option<AccountingViolation> {
        if !(dt_h > 0.0) {
            return None;
        }
        let step = self.config.integration_step_h;
        let t_end = vessel.state.time_h + dt_h;

        let mut violation = None;
        while vessel.state.time_h < t_end {
            let t0 = vessel.state.time_h;
            let (tick, t1) = if step > 0.0 {
                let tick = (t0 / step).floor();
                let boundary = (tick + 1.0) * step;
                // Rounding can put t0 on the far side of its own boundary
                let t1 = if boundary > t0 { boundary } else { t0 + step };
                (tick as i64, if t1 > t0 { t1.min(t_end) } else { t_end })
            } else {
                (0, t_end)
            };
            let growth_factor = self.tick_growth_factor(vessel, tick);
            self.integrate_tick(&mut vessel.state, t1, growth_factor);
            violation = self.reconcile(&mut vessel.state).or(violation);
        }

        let state = &mut vessel.state;
        state.dysfunction = state
            .exposures
            .iter()
            .map(|e| e.dysfunction_at(t_end))
            .fold(0.0, f64::max)
            .min(1.0);

        debug!(
            vessel = %state.id,
            t = t_end,
            viability = state.viability,
            dysfunction = state.dysfunction,
            confluence = state.confluence,
            "Advanced vessel"
        );

        violation
    }

    /// Growth jitter of grid tick `tick`, drawn from the growth stream on first entry
    fn tick_growth_factor(&self, vessel: &mut Vessel, tick: i64) -> f64 {
        match vessel.growth_tick {
            Some((cached, factor)) if cached == tick => factor,
            _ => {
                let factor = vessel
                    .streams
                    .growth
                    .lognormal_factor(self.config.growth_jitter);
                vessel.growth_tick = Some((tick, factor));
                factor
            }
        }
    }

    /// Step from `state.time_h` to `t1`, which must not cross a grid boundary
    fn integrate_tick(&self, state: &mut VesselState, t1: Hours, growth_factor: f64) {
        let t0 = state.time_h;
        let dt_h = t1 - t0;

        let compound_hazard: f64 = state
            .exposures
            .iter()
            .map(|e| e.hazard_between(t0, t1))
            .sum();

        let rate = self.config.growth_rate_per_h * growth_factor * state.viability;
        let (grown, time_at_cap) = grow_confluence(state.confluence, rate, dt_h);
        let confluence_hazard = if self.config.confluence_death_enabled {
            self.config.confluence_death_rate_per_h * time_at_cap
        } else {
            0.0
        };

        let total_hazard = compound_hazard + confluence_hazard;
        let survival = (-total_hazard).exp();
        let before = state.viability;
        state.viability = before * survival;
        let loss = before - state.viability;
        if total_hazard > 0.0 {
            let to_compound = loss * (compound_hazard / total_hazard);
            state.death.compound += to_compound;
            state.death.confluence += loss - to_compound;
        }

        state.confluence = grown * survival;
        state.time_h = t1;
    }

    /// Fold any gap between the death partition and `1 - viability` into `death_unknown`
    fn reconcile(&self, state: &mut VesselState) -> Option<AccountingViolation> {
        let residual = (1.0 - state.viability) - state.death.total();
        if residual == 0.0 {
            return None;
        }
        state.death.unknown = (state.death.unknown + residual).max(0.0);

        if residual.abs() <= self.config.partition_tolerance {
            return None;
        }

        let violation = AccountingViolation {
            vessel: state.id.clone(),
            residual,
            death_unknown_after: state.death.unknown,
        };
        if state.death.unknown > self.config.seeding_stress_baseline {
            warn!(
                vessel = %state.id,
                residual,
                death_unknown = state.death.unknown,
                "Unattributed viability loss exceeds baseline"
            );
        } else {
            debug!(vessel = %state.id, residual, "Folded unattributed loss into death_unknown");
        }
        Some(violation)
    }
}

/// Exponential growth capped at full confluence; returns (confluence, hours spent at the cap)
fn grow_confluence(confluence: f64, rate: f64, dt_h: Hours) -> (f64, Hours) {
    if confluence >= 1.0 {
        return (1.0, dt_h);
    }
    if confluence <= 0.0 || rate <= 0.0 {
        return (confluence, 0.0);
    }
    let time_to_cap = (1.0 / confluence).ln() / rate;
    if time_to_cap < dt_h {
        (1.0, dt_h - time_to_cap)
    } else {
        ((confluence * (rate * dt_h).exp()).min(1.0), 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MechanismClass;
    use crate::simulation::biology::{AxisMorphology, CellLine, CompoundParams};
    use crate::simulation::vessel::DeathMode;
    use std::collections::BTreeMap;

    fn biology() -> BiologyTable {
        let compound = CompoundParams {
            id: "halfkill".into(),
            stress_axis: MechanismClass::Mitochondrial,
            ic50_um: 4.0,
            hill: 2.0,
            instant_kill_max: 1.0,
            attrition_rate_per_h: 0.02,
            dysfunction_tau_h: 12.0,
        };
        let mut morphology = BTreeMap::new();
        morphology.insert(
            MechanismClass::Mitochondrial,
            AxisMorphology {
                mean: [0.0, -1.0, 0.0, 0.0, 0.0],
                spread: [0.1; 5],
            },
        );
        BiologyTable::new(
            vec![compound],
            vec![CellLine {
                id: "A549".into(),
                sensitivity: 1.0,
            }],
            morphology,
        )
        .unwrap()
    }

    fn substrate(config: SubstrateConfig) -> Substrate {
        Substrate::new(biology(), config, 7)
    }

    #[test]
    fn test_seeding_stress_goes_to_unknown() {
        let substrate = substrate(SubstrateConfig::default());
        let vessel = substrate.seed(VesselId::new("A01"), "A549", 0.98).unwrap();
        let death = vessel.state().death();
        assert!((death.unknown - 0.02).abs() < 1e-15);
        assert_eq!(death.compound, 0.0);
        assert_eq!(vessel.state().death_mode(), DeathMode::Unknown);
    }

    #[test]
    fn test_instant_half_kill_is_exact() {
        let substrate = substrate(SubstrateConfig::default());
        let mut vessel = substrate.seed(VesselId::new("A01"), "A549", 1.0).unwrap();
        substrate.treat(&mut vessel, "halfkill", 4.0, 0.0).unwrap();
        let state = vessel.state();
        assert_eq!(state.viability(), 0.5);
        assert_eq!(state.death().compound, 0.5);
        assert_eq!(state.death().confluence, 0.0);
        assert_eq!(state.death().unknown, 0.0);
    }

    #[test]
    fn test_unknown_compound_fails_fast() {
        let substrate = substrate(SubstrateConfig::default());
        let mut vessel = substrate.seed(VesselId::new("A01"), "A549", 1.0).unwrap();
        let before = vessel.state().clone();
        let err = substrate.treat(&mut vessel, "mystery", 1.0, 0.0).unwrap_err();
        assert!(matches!(err, LabError::UnknownCompound(_)));
        assert_eq!(vessel.state(), &before);
    }

    #[test]
    fn test_unknown_cell_line_rejected() {
        let substrate = substrate(SubstrateConfig::default());
        assert!(matches!(
            substrate.seed(VesselId::new("A01"), "HeLa", 1.0),
            Err(LabError::UnknownCellLine(_))
        ));
    }

    #[test]
    fn test_attrition_books_to_compound() {
        let substrate = substrate(SubstrateConfig::default());
        let mut vessel = substrate.seed(VesselId::new("A01"), "A549", 1.0).unwrap();
        substrate.treat(&mut vessel, "halfkill", 8.0, 0.0).unwrap();
        let after_treat = vessel.state().viability();
        substrate.advance(&mut vessel, 48.0);
        let state = vessel.state();
        assert!(state.viability() < after_treat);
        assert!(state.dysfunction() > 0.0);
        assert_eq!(state.death().confluence, 0.0);
        assert!(state.partition_error() < 1e-9);
    }

    #[test]
    fn test_confluence_capped_without_death_by_default() {
        let substrate = substrate(SubstrateConfig::default());
        let mut vessel = substrate.seed(VesselId::new("A01"), "A549", 1.0).unwrap();
        substrate.advance(&mut vessel, 500.0);
        let state = vessel.state();
        assert_eq!(state.confluence(), 1.0);
        assert_eq!(state.viability(), 1.0);
        assert_eq!(state.death().confluence, 0.0);
    }

    #[test]
    fn test_confluence_death_when_enabled() {
        let config = SubstrateConfig {
            confluence_death_enabled: true,
            ..SubstrateConfig::default()
        };
        let substrate = substrate(config);
        let mut vessel = substrate.seed(VesselId::new("A01"), "A549", 1.0).unwrap();
        substrate.advance(&mut vessel, 500.0);
        let state = vessel.state();
        assert!(state.viability() < 1.0);
        assert!(state.death().confluence > 0.0);
        assert_eq!(state.death().compound, 0.0);
        assert_eq!(state.death_mode(), DeathMode::Confluence);
    }

    #[test]
    fn test_treating_in_the_past_rejected() {
        let substrate = substrate(SubstrateConfig::default());
        let mut vessel = substrate.seed(VesselId::new("A01"), "A549", 1.0).unwrap();
        substrate.advance(&mut vessel, 10.0);
        assert!(matches!(
            substrate.treat(&mut vessel, "halfkill", 1.0, 5.0),
            Err(LabError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_reconcile_folds_residual_into_unknown() {
        let substrate = substrate(SubstrateConfig::default());
        let mut vessel = substrate.seed(VesselId::new("A01"), "A549", 1.0).unwrap();
        substrate.treat(&mut vessel, "halfkill", 4.0, 0.0).unwrap();

        vessel.state.death.compound = 0.4;
        let violation = substrate.reconcile(&mut vessel.state).unwrap();

        let state = vessel.state();
        assert_eq!(state.death().compound, 0.4);
        assert_eq!(state.death().confluence, 0.0);
        assert!((state.death().unknown - 0.1).abs() < 1e-12);
        assert_eq!(violation.vessel, VesselId::new("A01"));
        assert!((violation.residual - 0.1).abs() < 1e-12);
        assert_eq!(violation.death_unknown_after, state.death().unknown);
        assert!(state.partition_error() < 1e-12);
    }

    #[test]
    fn test_reconcile_within_tolerance_is_silent() {
        let substrate = substrate(SubstrateConfig::default());
        let mut vessel = substrate.seed(VesselId::new("A01"), "A549", 1.0).unwrap();
        substrate.treat(&mut vessel, "halfkill", 4.0, 0.0).unwrap();

        vessel.state.death.compound -= 1e-9;
        assert!(substrate.reconcile(&mut vessel.state).is_none());
        assert!((vessel.state().death().unknown - 1e-9).abs() < 1e-15);
        assert!(vessel.state().partition_error() < 1e-12);
    }

    #[test]
    fn test_advance_reports_corrupted_partition() {
        let substrate = substrate(SubstrateConfig::default());
        let mut vessel = substrate.seed(VesselId::new("A01"), "A549", 1.0).unwrap();
        vessel.state.death.unknown = 0.2;

        let violation = substrate.advance(&mut vessel, 3.0).unwrap();
        assert!((violation.residual + 0.2).abs() < 1e-12);
        assert_eq!(vessel.state().death().unknown, 0.0);
        assert!(vessel.state().partition_error() < 1e-12);
    }

    #[test]
    fn test_partial_ticks_draw_growth_jitter_once() {
        let substrate = substrate(SubstrateConfig::default());
        let mut whole = substrate.seed(VesselId::new("A01"), "A549", 1.0).unwrap();
        let mut halves = substrate.seed(VesselId::new("A01"), "A549", 1.0).unwrap();

        substrate.advance(&mut whole, 1.0);
        substrate.advance(&mut halves, 0.5);
        substrate.advance(&mut halves, 0.5);

        assert_eq!(whole.streams().snapshot().growth, halves.streams().snapshot().growth);
        assert_eq!(whole.state().time_h(), halves.state().time_h());
        assert!((whole.state().confluence() - halves.state().confluence()).abs() < 1e-12);

        substrate.advance(&mut whole, 1.0);
        assert_ne!(whole.streams().snapshot().growth, halves.streams().snapshot().growth);
    }

    #[test]
    fn test_grow_confluence_reports_time_at_cap() {
        let (c, capped) = grow_confluence(0.5, (2.0f64).ln(), 3.0);
        assert_eq!(c, 1.0);
        assert!((capped - 2.0).abs() < 1e-12);
        let (c, capped) = grow_confluence(0.25, (2.0f64).ln(), 1.0);
        assert!((c - 0.5).abs() < 1e-12);
        assert_eq!(capped, 0.0);
    }
}
