//! Lab configuration with documented constants
//!
//! Everything tunable in the decision pipeline lives here. Each section
//! deserializes from its own TOML table and falls back to the defaults
//! documented below when the table or a field is absent. The biology
//! table is *not* part of this file: compound and cell-line parameters
//! have no defaults (see `simulation::biology`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::error::{LabError, Result};
use crate::core::types::{FeatureArray, Hours, MechanismClass};

/// Top-level configuration, one section per pipeline stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    /// Base seed mixed with each vessel id to derive its RNG streams
    pub base_seed: u64,
    pub substrate: SubstrateConfig,
    pub assay: AssayConfig,
    pub context: ContextEffects,
    pub posterior: PosteriorConfig,
    pub calibration: CalibrationConfig,
    pub planner: PlannerConfig,
    pub artifacts: ArtifactPolicy,
    pub training: TrainingConfig,
}

impl LabConfig {
    /// Load from a TOML file and validate
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: LabConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        self.substrate.validate()?;
        self.assay.validate()?;
        self.planner.validate()?;
        Ok(())
    }
}

/// Simulation substrate parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubstrateConfig {
    /// Seeding stress tolerated before a warning (fraction of viability)
    ///
    /// Unattributed loss always lands in `death_unknown`; this only
    /// controls when that is loud.
    pub seeding_stress_baseline: f64,

    /// Allowed drift between the death partition and `1 - viability`
    pub partition_tolerance: f64,

    /// Exponential confluence growth rate per hour at full viability
    ///
    /// At 0.03/h an untreated well doubles in roughly 23 hours.
    pub growth_rate_per_h: f64,

    /// Log-normal spread of the growth rate, one draw per integration tick (growth stream)
    pub growth_jitter: f64,

    /// Width of the absolute-time grid that `advance` integrates on
    ///
    /// Observations that land on grid points leave the trajectory
    /// bit-identical to an unobserved run.
    pub integration_step_h: f64,

    /// Confluence right after seeding
    pub initial_confluence: f64,

    /// Convert time spent at full confluence into `death_confluence`
    ///
    /// Off by default: confluence is capped without killing anything.
    pub confluence_death_enabled: bool,

    /// Hazard per hour while capped at full confluence
    pub confluence_death_rate_per_h: f64,

    /// Log-normal spread of each exposure's attrition rate (treatment stream)
    pub attrition_jitter: f64,
}

impl Default for SubstrateConfig {
    fn default() -> Self {
        Self {
            seeding_stress_baseline: 0.025,
            partition_tolerance: 1e-6,
            growth_rate_per_h: 0.03,
            growth_jitter: 0.05,
            integration_step_h: 1.0,
            initial_confluence: 0.2,
            confluence_death_enabled: false,
            confluence_death_rate_per_h: 0.01,
            attrition_jitter: 0.1,
        }
    }
}

impl SubstrateConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.initial_confluence) {
            return Err(LabError::InvalidConfig(format!(
                "initial_confluence ({}) must be within [0, 1]",
                self.initial_confluence
            )));
        }
        if self.growth_rate_per_h < 0.0 || self.confluence_death_rate_per_h < 0.0 {
            return Err(LabError::InvalidConfig("Rates must be non-negative".into()));
        }
        if !(self.integration_step_h.is_finite() && self.integration_step_h > 0.0) {
            return Err(LabError::InvalidConfig(format!(
                "integration_step_h ({}) must be positive and finite",
                self.integration_step_h
            )));
        }
        if self.partition_tolerance <= 0.0 {
            return Err(LabError::InvalidConfig("partition_tolerance must be positive".into()));
        }
        Ok(())
    }
}

/// Measurement layer noise model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssayConfig {
    /// Per-channel Gaussian noise on features (log-fold-change units)
    pub measurement_noise: f64,
    /// Gaussian noise on the viability readout
    pub viability_noise: f64,
    /// Gaussian noise on the confluence readout
    pub confluence_noise: f64,
    /// Number of fields averaged by a targeted (rescue) measurement
    pub rescue_replicates: u32,
}

impl Default for AssayConfig {
    fn default() -> Self {
        Self {
            measurement_noise: 0.08,
            viability_noise: 0.01,
            confluence_noise: 0.02,
            rescue_replicates: 4,
        }
    }
}

impl AssayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rescue_replicates == 0 {
            return Err(LabError::InvalidConfig("rescue_replicates must be at least 1".into()));
        }
        Ok(())
    }
}

/// Context (confound) effects on morphology
///
/// Used by the assay to generate shifts and by the nuisance model to
/// estimate them, so both sides agree on what "context" means.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextEffects {
    /// Half-width of the per-day batch shift on each channel
    pub day_scale: f64,
    /// Half-width of the per-operator shift on each channel
    pub operator_scale: f64,
    /// Feature shift per unit of confluence above the reference
    pub confluence_coupling: FeatureArray,
    /// Confluence at which the coupling contributes nothing
    pub reference_confluence: f64,
}

impl Default for ContextEffects {
    fn default() -> Self {
        Self {
            day_scale: 0.1,
            operator_scale: 0.05,
            confluence_coupling: [0.0, 0.1, 0.6, 0.3, 0.0],
            reference_confluence: 0.5,
        }
    }
}

impl ContextEffects {
    /// Context with no confounds at all, as used for signature learning
    pub fn clean() -> Self {
        Self {
            day_scale: 0.0,
            operator_scale: 0.0,
            confluence_coupling: [0.0; 5],
            reference_confluence: 0.5,
        }
    }

    /// Same coupling shape, batch effects scaled to `scale`
    pub fn with_batch_scale(&self, scale: f64) -> Self {
        Self {
            day_scale: scale,
            operator_scale: scale * 0.5,
            ..self.clone()
        }
    }
}

/// Posterior evaluation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PosteriorConfig {
    /// Prior mass per class; uniform over the signature set when empty
    pub prior: Vec<(MechanismClass, f64)>,
    /// Lowest log-likelihood a class may contribute
    pub log_likelihood_floor: f64,
}

impl Default for PosteriorConfig {
    fn default() -> Self {
        Self {
            prior: Vec::new(),
            log_likelihood_floor: -1.0e4,
        }
    }
}

/// Runtime calibration settings (the model itself is an artifact)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Nuisance fraction at or above which a belief is "high nuisance"
    pub high_nuisance_threshold: f64,
    /// Cap calibrated confidence at the raw top probability for high-nuisance beliefs
    ///
    /// Off by default: calibration stays fully data-driven.
    pub high_nuisance_cap: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            high_nuisance_threshold: 0.5,
            high_nuisance_cap: false,
        }
    }
}

/// How waiting is penalized in commit utility
///
/// Both shapes are non-decreasing for non-negative elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimePenalty {
    Linear { per_hour: f64 },
    Quadratic { per_hour_sq: f64 },
}

impl Default for TimePenalty {
    fn default() -> Self {
        TimePenalty::Linear { per_hour: 0.002 }
    }
}

/// Beam-search planner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Number of live nodes kept per step
    pub beam_width: usize,
    /// Minimum calibrated confidence for a COMMIT candidate to exist
    pub commit_threshold: f64,
    /// Utility of committing at calibrated confidence 1.0 and zero elapsed time
    pub reward_scale: f64,
    pub time_penalty: TimePenalty,
    /// Simulated hours advanced by one WAIT
    pub wait_step_h: Hours,
    /// Time budget, counted from the well's first observation (`timepoint_h`)
    pub max_elapsed_h: Hours,
    /// Measurement budget, including the initial observation
    pub max_measurements: u32,
    /// Rescue measurements allowed at one timepoint
    pub max_rescues_per_timepoint: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            beam_width: 5,
            commit_threshold: 0.70,
            reward_scale: 1.0,
            time_penalty: TimePenalty::default(),
            wait_step_h: 12.0,
            max_elapsed_h: 96.0,
            max_measurements: 12,
            max_rescues_per_timepoint: 1,
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.beam_width == 0 {
            return Err(LabError::InvalidConfig("beam_width must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.commit_threshold) {
            return Err(LabError::InvalidConfig(format!(
                "commit_threshold ({}) must be within [0, 1]",
                self.commit_threshold
            )));
        }
        // A non-positive reward would rank low confidence above high confidence
        if !(self.reward_scale.is_finite() && self.reward_scale > 0.0) {
            return Err(LabError::InvalidConfig(format!(
                "reward_scale ({}) must be positive and finite",
                self.reward_scale
            )));
        }
        if !(self.wait_step_h.is_finite() && self.wait_step_h > 0.0) {
            return Err(LabError::InvalidConfig(format!(
                "wait_step_h ({}) must be positive and finite",
                self.wait_step_h
            )));
        }
        if !(self.max_elapsed_h.is_finite() && self.max_elapsed_h >= 0.0) {
            return Err(LabError::InvalidConfig(format!(
                "max_elapsed_h ({}) must be non-negative and finite",
                self.max_elapsed_h
            )));
        }
        let rate = match self.time_penalty {
            TimePenalty::Linear { per_hour } => per_hour,
            TimePenalty::Quadratic { per_hour_sq } => per_hour_sq,
        };
        if !(rate.is_finite() && rate >= 0.0) {
            return Err(LabError::InvalidConfig(
                "time penalty must be non-negative and finite".into(),
            ));
        }
        Ok(())
    }
}

/// Which learned artifact versions this deployment accepts
///
/// Empty lists accept any version whose digest verifies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactPolicy {
    pub accepted_signature_versions: Vec<String>,
    pub accepted_calibrator_versions: Vec<String>,
}

/// Offline training settings (signature learning and calibrator fitting)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Wells simulated per (compound, dose, timepoint, stratum) cell
    pub replicates: u32,
    pub timepoints_h: Vec<Hours>,
    /// Doses as multiples of each compound's IC50
    pub dose_multipliers: Vec<f64>,
    /// Batch-effect scales for the low/medium/high nuisance strata
    pub nuisance_scales: Vec<f64>,
    pub ece_bins: usize,
    pub ece_threshold: f64,
    pub learning_rate: f64,
    pub iterations: usize,
    pub l2: f64,
    /// Increment applied to the nuisance penalty while the high-nuisance stratum is overconfident
    pub conservatism_step: f64,
    pub conservatism_max_steps: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            replicates: 6,
            timepoints_h: vec![12.0, 24.0, 36.0, 48.0, 72.0],
            dose_multipliers: vec![0.3, 1.0, 3.0, 10.0],
            nuisance_scales: vec![0.02, 0.2, 0.6],
            ece_bins: 10,
            ece_threshold: 0.1,
            learning_rate: 0.5,
            iterations: 1500,
            l2: 1e-3,
            conservatism_step: 0.05,
            conservatism_max_steps: 400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(LabConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config = LabConfig::from_toml_str(
            r#"
            base_seed = 7

            [planner]
            beam_width = 3
            time_penalty = { kind = "quadratic", per_hour_sq = 0.0001 }
            "#,
        )
        .expect("partial config should load");
        assert_eq!(config.base_seed, 7);
        assert_eq!(config.planner.beam_width, 3);
        assert_eq!(config.planner.commit_threshold, 0.70);
        assert_eq!(
            config.planner.time_penalty,
            TimePenalty::Quadratic { per_hour_sq: 0.0001 }
        );
        assert_eq!(config.substrate.seeding_stress_baseline, 0.025);
    }

    #[test]
    fn test_zero_beam_width_rejected() {
        let mut config = LabConfig::default();
        config.planner.beam_width = 0;
        assert!(matches!(config.validate(), Err(LabError::InvalidConfig(_))));
    }

    #[test]
    fn test_planner_rejects_non_positive_or_nan_scales() {
        let invalid = [
            PlannerConfig {
                reward_scale: 0.0,
                ..PlannerConfig::default()
            },
            PlannerConfig {
                reward_scale: -1.0,
                ..PlannerConfig::default()
            },
            PlannerConfig {
                reward_scale: f64::INFINITY,
                ..PlannerConfig::default()
            },
            PlannerConfig {
                wait_step_h: f64::NAN,
                ..PlannerConfig::default()
            },
            PlannerConfig {
                max_elapsed_h: f64::NAN,
                ..PlannerConfig::default()
            },
            PlannerConfig {
                max_elapsed_h: -12.0,
                ..PlannerConfig::default()
            },
            PlannerConfig {
                time_penalty: TimePenalty::Linear { per_hour: f64::NAN },
                ..PlannerConfig::default()
            },
        ];
        for config in &invalid {
            assert!(
                matches!(config.validate(), Err(LabError::InvalidConfig(_))),
                "{:?} should be rejected",
                config
            );
        }
    }

    #[test]
    fn test_substrate_rejects_bad_integration_step() {
        for step in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = SubstrateConfig {
                integration_step_h: step,
                ..SubstrateConfig::default()
            };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_clean_context_has_no_effects() {
        let clean = ContextEffects::clean();
        assert_eq!(clean.day_scale, 0.0);
        assert!(clean.confluence_coupling.iter().all(|c| *c == 0.0));
    }
}
