//! What the planner can do to a vessel
//!
//! The search never touches a substrate directly. Each branch owns a clone
//! of its environment, so lookahead on one branch cannot perturb another.

use serde::{Deserialize, Serialize};

use crate::calibration::belief::BeliefState;
use crate::core::error::InferenceUnavailable;
use crate::core::types::{Hours, MechanismClass};

/// Calibrated belief about the latest observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub top_class: MechanismClass,
    pub belief: BeliefState,
}

/// Interface the beam search drives
pub trait PlanningEnvironment: Clone {
    /// Advance simulated time and take a fresh measurement
    fn wait(&mut self, hours: Hours);

    /// Take a targeted measurement without advancing time
    fn rescue(&mut self);

    /// Posterior and calibrated belief for the latest measurement
    fn assess(&self) -> Result<Assessment, InferenceUnavailable>;

    /// Hours since the decision clock started
    fn elapsed_h(&self) -> Hours;

    /// Measurements taken so far, including the initial one
    fn measurements(&self) -> u32;
}
