//! Vessel state and death accounting

use serde::{Deserialize, Serialize};

use crate::core::types::{Hours, MechanismClass, VesselId};
use crate::simulation::rng::RngStreams;

/// Where lost viability went
///
/// Invariant: `compound + confluence + unknown == 1 - viability` within the
/// substrate's partition tolerance, after every substrate call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeathPartition {
    pub compound: f64,
    pub confluence: f64,
    pub unknown: f64,
}

impl DeathPartition {
    pub fn total(&self) -> f64 {
        self.compound + self.confluence + self.unknown
    }

    /// Dominant cause of death; `None` when nothing has died
    pub fn mode(&self) -> DeathMode {
        if self.total() <= 0.0 {
            return DeathMode::None;
        }
        if self.unknown >= self.compound && self.unknown >= self.confluence {
            DeathMode::Unknown
        } else if self.compound >= self.confluence {
            DeathMode::Compound
        } else {
            DeathMode::Confluence
        }
    }
}

/// Death-cause label of a well
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathMode {
    None,
    Compound,
    Confluence,
    Unknown,
}

/// One compound exposure and its sampled kinetics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exposure {
    pub compound: String,
    pub stress_axis: MechanismClass,
    pub dose_um: f64,
    pub dose_multiplier: f64,
    pub start_h: Hours,
    /// Dysfunction approached asymptotically, in [0, 1]
    pub target_dysfunction: f64,
    pub tau_h: Hours,
    /// Attrition hazard per hour at full dysfunction, after jitter
    pub attrition_rate_per_h: f64,
}

impl Exposure {
    /// Dysfunction at absolute time `t`
    pub fn dysfunction_at(&self, t: Hours) -> f64 {
        let s = (t - self.start_h).max(0.0);
        self.target_dysfunction * (1.0 - (-s / self.tau_h).exp())
    }

    /// Integral of dysfunction from exposure start to `t`
    fn dysfunction_integral(&self, t: Hours) -> f64 {
        let s = (t - self.start_h).max(0.0);
        self.target_dysfunction * (s - self.tau_h * (1.0 - (-s / self.tau_h).exp()))
    }

    /// Cumulative attrition hazard accrued between `t0` and `t1`
    pub fn hazard_between(&self, t0: Hours, t1: Hours) -> f64 {
        self.attrition_rate_per_h * (self.dysfunction_integral(t1) - self.dysfunction_integral(t0))
    }
}

/// State of one simulated cell population
///
/// Fields are read-only outside the substrate; only `Substrate` mutates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselState {
    pub(crate) id: VesselId,
    pub(crate) cell_line: String,
    pub(crate) time_h: Hours,
    pub(crate) viability: f64,
    pub(crate) death: DeathPartition,
    pub(crate) confluence: f64,
    pub(crate) exposures: Vec<Exposure>,
    pub(crate) dysfunction: f64,
}

impl VesselState {
    pub fn id(&self) -> &VesselId {
        &self.id
    }

    pub fn cell_line(&self) -> &str {
        &self.cell_line
    }

    pub fn time_h(&self) -> Hours {
        self.time_h
    }

    pub fn viability(&self) -> f64 {
        self.viability
    }

    pub fn death(&self) -> &DeathPartition {
        &self.death
    }

    pub fn death_mode(&self) -> DeathMode {
        self.death.mode()
    }

    pub fn confluence(&self) -> f64 {
        self.confluence
    }

    pub fn exposures(&self) -> &[Exposure] {
        &self.exposures
    }

    /// Cached dysfunction score from the last substrate step
    pub fn dysfunction(&self) -> f64 {
        self.dysfunction
    }

    /// Stress axis of the most engaged exposure, if treated
    pub fn dominant_exposure(&self) -> Option<&Exposure> {
        self.exposures.iter().max_by(|a, b| {
            a.dysfunction_at(self.time_h)
                .total_cmp(&b.dysfunction_at(self.time_h))
        })
    }

    /// `|Σbuckets − (1 − viability)|`
    pub fn partition_error(&self) -> f64 {
        (self.death.total() - (1.0 - self.viability)).abs()
    }
}

/// A vessel together with its private random streams
#[derive(Debug, Clone)]
pub struct Vessel {
    pub(crate) state: VesselState,
    pub(crate) streams: RngStreams,
    /// Growth jitter of the integration tick last entered, keyed by tick index
    pub(crate) growth_tick: Option<(i64, f64)>,
}

impl Vessel {
    pub fn state(&self) -> &VesselState {
        &self.state
    }

    pub fn streams(&self) -> &RngStreams {
        &self.streams
    }
}
