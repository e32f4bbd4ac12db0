//! Core type definitions used throughout the codebase

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Number of morphology channels in a feature vector
pub const FEATURE_DIM: usize = 5;

/// Fixed-length morphology readout, one value per [`FeatureChannel`]
pub type FeatureArray = [f64; FEATURE_DIM];

/// Square matrix in feature space
pub type FeatureMatrix = [[f64; FEATURE_DIM]; FEATURE_DIM];

/// Simulated time in hours
pub type Hours = f64;

/// Unique identifier for a simulated vessel (one well)
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[display(fmt = "{}", _0)]
pub struct VesselId(pub String);

impl VesselId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Biological stress mechanism a compound engages
///
/// Closed set: adding a class is an exhaustiveness change everywhere it is matched.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MechanismClass {
    #[display(fmt = "mitochondrial")]
    Mitochondrial,
    #[display(fmt = "er_stress")]
    ErStress,
    #[display(fmt = "microtubule")]
    Microtubule,
}

impl MechanismClass {
    pub const ALL: [MechanismClass; 3] = [
        MechanismClass::Mitochondrial,
        MechanismClass::ErStress,
        MechanismClass::Microtubule,
    ];
}

/// Morphology channel, in feature-vector order
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureChannel {
    #[display(fmt = "er")]
    Er,
    #[display(fmt = "mito")]
    Mito,
    #[display(fmt = "nucleus")]
    Nucleus,
    #[display(fmt = "actin")]
    Actin,
    #[display(fmt = "rna")]
    Rna,
}

impl FeatureChannel {
    pub const ALL: [FeatureChannel; FEATURE_DIM] = [
        FeatureChannel::Er,
        FeatureChannel::Mito,
        FeatureChannel::Nucleus,
        FeatureChannel::Actin,
        FeatureChannel::Rna,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// A feature vector produced by one observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub FeatureArray);

impl FeatureVector {
    pub fn zeros() -> Self {
        Self([0.0; FEATURE_DIM])
    }

    pub fn get(&self, channel: FeatureChannel) -> f64 {
        self.0[channel.index()]
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    pub fn as_array(&self) -> &FeatureArray {
        &self.0
    }
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self::zeros()
    }
}
