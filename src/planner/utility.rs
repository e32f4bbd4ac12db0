//! Commit utility

use crate::core::config::{PlannerConfig, TimePenalty};
use crate::core::types::Hours;

impl TimePenalty {
    /// Penalty after `elapsed_h` hours; non-decreasing, zero at or before time zero
    pub fn at(&self, elapsed_h: Hours) -> f64 {
        let t = if elapsed_h.is_finite() { elapsed_h.max(0.0) } else { 0.0 };
        match *self {
            TimePenalty::Linear { per_hour } => per_hour.max(0.0) * t,
            TimePenalty::Quadratic { per_hour_sq } => per_hour_sq.max(0.0) * t * t,
        }
    }
}

/// `calibrated_confidence × reward_scale − time_penalty(elapsed)`
pub fn commit_utility(calibrated_confidence: f64, elapsed_h: Hours, config: &PlannerConfig) -> f64 {
    calibrated_confidence * config.reward_scale - config.time_penalty.at(elapsed_h)
}

/// Best utility any descendant could still reach from `elapsed_h`
pub fn utility_bound(elapsed_h: Hours, config: &PlannerConfig) -> f64 {
    commit_utility(1.0, elapsed_h, config)
}
