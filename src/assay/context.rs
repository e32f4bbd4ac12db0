//! Well context and the morphology shifts it induces
//!
//! Batch shifts are a deterministic function of the context labels (day,
//! operator), hashed with SHA-256. They consume no randomness at all.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::config::ContextEffects;
use crate::core::types::{FeatureArray, FEATURE_DIM};

/// Experimental context of one well
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WellContext {
    pub cell_line: String,
    pub day: u32,
    pub operator: String,
    pub replicate: u32,
}

/// Stable value in [-1, 1] for a (factor, level, channel) triple
pub fn hashed_unit(factor: &str, level: &str, channel: usize) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(factor.as_bytes());
    hasher.update(b"|");
    hasher.update(level.as_bytes());
    hasher.update(b"|");
    hasher.update((channel as u64).to_le_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let unit = u64::from_le_bytes(bytes) as f64 / u64::MAX as f64;
    unit * 2.0 - 1.0
}

/// Day and operator shift; unknown to the nuisance model except in distribution
pub fn batch_shift(effects: &ContextEffects, context: &WellContext) -> FeatureArray {
    let day = context.day.to_string();
    let mut shift = [0.0; FEATURE_DIM];
    for (c, value) in shift.iter_mut().enumerate() {
        *value = effects.day_scale * hashed_unit("day", &day, c)
            + effects.operator_scale * hashed_unit("operator", &context.operator, c);
    }
    shift
}

/// Shift caused by local cell density
pub fn confluence_shift(effects: &ContextEffects, confluence: f64) -> FeatureArray {
    let excess = confluence - effects.reference_confluence;
    let mut shift = [0.0; FEATURE_DIM];
    for (value, coupling) in shift.iter_mut().zip(effects.confluence_coupling.iter()) {
        *value = coupling * excess;
    }
    shift
}
