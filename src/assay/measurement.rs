//! Measurement layer: read vessel state through the assay stream only

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::assay::context::{batch_shift, confluence_shift, WellContext};
use crate::core::config::{AssayConfig, ContextEffects};
use crate::core::types::{FeatureVector, Hours, FEATURE_DIM};
use crate::simulation::biology::BiologyTable;
use crate::simulation::rng::AssayStream;
use crate::simulation::vessel::{Vessel, VesselState};

/// One observation of a vessel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub features: FeatureVector,
    /// Measured viability, clamped to [0, 1]
    pub viability: f64,
    /// Measured confluence, clamped to [0, 1]
    pub confluence: f64,
    pub timepoint_h: Hours,
    /// Fields averaged into this observation
    pub replicates: u32,
}

/// Imaging assay: morphology table, noise model and context effects
#[derive(Debug, Clone)]
pub struct Assay {
    biology: BiologyTable,
    config: AssayConfig,
    effects: ContextEffects,
}

impl Assay {
    pub fn new(biology: BiologyTable, config: AssayConfig, effects: ContextEffects) -> Self {
        Self {
            biology,
            config,
            effects,
        }
    }

    pub fn config(&self) -> &AssayConfig {
        &self.config
    }

    pub fn effects(&self) -> &ContextEffects {
        &self.effects
    }

    /// Routine single-field measurement
    pub fn observe(&self, vessel: &mut Vessel, context: &WellContext) -> Observation {
        self.observe_replicated(vessel, context, 1)
    }

    /// Targeted measurement averaging the configured number of fields
    pub fn observe_targeted(&self, vessel: &mut Vessel, context: &WellContext) -> Observation {
        self.observe_replicated(vessel, context, self.config.rescue_replicates)
    }

    fn observe_replicated(&self, vessel: &mut Vessel, context: &WellContext, replicates: u32) -> Observation {
        let Vessel { state, streams, .. } = vessel;
        self.measure(state, context, streams.assay_mut(), replicates)
    }

    /// Produce an observation from a read-only state and the assay stream
    pub fn measure(
        &self,
        state: &VesselState,
        context: &WellContext,
        stream: &mut AssayStream,
        replicates: u32,
    ) -> Observation {
        let replicates = replicates.max(1);
        let batch = batch_shift(&self.effects, context);
        let density = confluence_shift(&self.effects, state.confluence());

        let mut sum = [0.0; FEATURE_DIM];
        for _ in 0..replicates {
            for exposure in state.exposures() {
                let dysfunction = exposure.dysfunction_at(state.time_h());
                if let Some(axis) = self.biology.morphology(exposure.stress_axis) {
                    for (c, total) in sum.iter_mut().enumerate() {
                        let cell = axis.mean[c] + axis.spread[c] * stream.standard_normal();
                        *total += dysfunction * cell;
                    }
                }
            }
            for total in sum.iter_mut() {
                *total += stream.normal(self.config.measurement_noise);
            }
        }

        let mut features = [0.0; FEATURE_DIM];
        for c in 0..FEATURE_DIM {
            features[c] = sum[c] / replicates as f64 + batch[c] + density[c];
        }

        let viability = (state.viability() + stream.normal(self.config.viability_noise)).clamp(0.0, 1.0);
        let confluence = (state.confluence() + stream.normal(self.config.confluence_noise)).clamp(0.0, 1.0);

        trace!(vessel = %state.id(), t = state.time_h(), replicates, "Measured vessel");

        Observation {
            features: FeatureVector(features),
            viability,
            confluence,
            timepoint_h: state.time_h(),
            replicates,
        }
    }
}
