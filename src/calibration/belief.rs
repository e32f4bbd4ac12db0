//! Belief state at a decision point

use serde::{Deserialize, Serialize};

use crate::core::types::Hours;
use crate::inference::posterior::MechanismPosterior;

/// Number of inputs the calibrator sees
pub const CALIBRATION_INPUTS: usize = 7;

/// Posterior statistics and context the calibrator maps to a probability of being right
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeliefFeatures {
    pub top_probability: f64,
    pub margin: f64,
    pub entropy: f64,
    pub nuisance_fraction: f64,
    pub timepoint_h: Hours,
    pub dose_multiplier: f64,
    pub viability: f64,
}

impl BeliefFeatures {
    pub fn from_posterior(
        posterior: &MechanismPosterior,
        timepoint_h: Hours,
        dose_multiplier: f64,
        viability: f64,
    ) -> Self {
        Self {
            top_probability: posterior.top_probability,
            margin: posterior.margin,
            entropy: posterior.entropy,
            nuisance_fraction: posterior.nuisance_fraction,
            timepoint_h,
            dose_multiplier,
            viability,
        }
    }

    /// Inputs in calibrator order
    pub fn to_array(&self) -> [f64; CALIBRATION_INPUTS] {
        [
            self.top_probability,
            self.margin,
            self.entropy,
            self.nuisance_fraction,
            self.timepoint_h,
            self.dose_multiplier,
            self.viability,
        ]
    }
}

/// Immutable snapshot consumed by the planner and logged on every COMMIT
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeliefState {
    pub top_probability: f64,
    pub margin: f64,
    pub entropy: f64,
    pub nuisance_fraction: f64,
    pub timepoint_h: Hours,
    pub dose_multiplier: f64,
    pub viability: f64,
    pub calibrated_confidence: f64,
}

impl BeliefState {
    pub fn new(features: BeliefFeatures, calibrated_confidence: f64) -> Self {
        Self {
            top_probability: features.top_probability,
            margin: features.margin,
            entropy: features.entropy,
            nuisance_fraction: features.nuisance_fraction,
            timepoint_h: features.timepoint_h,
            dose_multiplier: features.dose_multiplier,
            viability: features.viability,
            calibrated_confidence,
        }
    }

    pub fn features(&self) -> BeliefFeatures {
        BeliefFeatures {
            top_probability: self.top_probability,
            margin: self.margin,
            entropy: self.entropy,
            nuisance_fraction: self.nuisance_fraction,
            timepoint_h: self.timepoint_h,
            dose_multiplier: self.dose_multiplier,
            viability: self.viability,
        }
    }
}
