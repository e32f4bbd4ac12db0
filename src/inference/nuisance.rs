//! Context (confound) model for one observation
//!
//! The estimator knows how density shifts morphology and how large batch
//! effects are in distribution. It subtracts what it can attribute to
//! context and widens the class covariances by what it cannot.

use serde::{Deserialize, Serialize};

use crate::assay::context::confluence_shift;
use crate::assay::measurement::Observation;
use crate::core::config::ContextEffects;
use crate::core::types::{FeatureArray, FEATURE_DIM};

/// Estimated context contribution to one observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NuisanceModel {
    /// Additive bias attributed to context
    pub mean_shift: FeatureArray,
    /// Extra per-channel variance attributed to context
    pub variance_inflation: FeatureArray,
    /// Share of total feature variance attributed to context, in [0, 1]
    pub fraction: f64,
}

impl NuisanceModel {
    /// No confound at all
    pub fn none() -> Self {
        Self {
            mean_shift: [0.0; FEATURE_DIM],
            variance_inflation: [0.0; FEATURE_DIM],
            fraction: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NuisanceEstimator {
    effects: ContextEffects,
    confluence_noise: f64,
}

impl NuisanceEstimator {
    pub fn new(effects: ContextEffects, confluence_noise: f64) -> Self {
        Self {
            effects,
            confluence_noise,
        }
    }

    /// Estimate the confound for `observation` against a mechanism variance scale
    pub fn estimate(&self, observation: &Observation, mechanism_variance: f64) -> NuisanceModel {
        let mean_shift = confluence_shift(&self.effects, observation.confluence);

        // Uniform[-s, s] has variance s²/3
        let batch_variance =
            (self.effects.day_scale.powi(2) + self.effects.operator_scale.powi(2)) / 3.0;

        let mut variance_inflation = [0.0; FEATURE_DIM];
        for (c, inflation) in variance_inflation.iter_mut().enumerate() {
            let density = self.effects.confluence_coupling[c] * self.confluence_noise;
            *inflation = batch_variance + density * density;
        }

        let context_variance: f64 = variance_inflation.iter().sum();
        let total = context_variance + mechanism_variance.max(0.0);
        let fraction = if total > 0.0 {
            (context_variance / total).clamp(0.0, 1.0)
        } else {
            0.0
        };

        NuisanceModel {
            mean_shift,
            variance_inflation,
            fraction,
        }
    }
}
