use thiserror::Error;

use crate::core::types::VesselId;

/// Fatal errors: bad configuration, bad artifacts, I/O.
///
/// These stop the run for the affected vessel and are never retried.
#[derive(Error, Debug)]
pub enum LabError {
    #[error("Unknown compound: {0}")]
    UnknownCompound(String),

    #[error("Unknown cell line: {0}")]
    UnknownCellLine(String),

    #[error("Compound {compound}: missing kinetic parameter `{parameter}`")]
    MissingParameter { compound: String, parameter: &'static str },

    #[error("Compound {compound}: invalid value {value} for `{parameter}`")]
    InvalidParameter {
        compound: String,
        parameter: &'static str,
        value: f64,
    },

    #[error("{kind} artifact has no version")]
    MissingArtifactVersion { kind: &'static str },

    #[error("{kind} artifact version `{version}` is not recognized")]
    UnrecognizedArtifactVersion { kind: &'static str, version: String },

    #[error("{kind} artifact version `{version}` does not match its content digest")]
    ArtifactDigestMismatch { kind: &'static str, version: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Inference unavailable: {0}")]
    Inference(#[from] InferenceUnavailable),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, LabError>;

/// Mechanism inference could not produce a posterior.
///
/// Recoverable: carried as an explicit state instead of aborting a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceUnavailable {
    #[error("need at least two mechanism classes, found {found}")]
    TooFewClasses { found: usize },

    #[error("every class likelihood collapsed to the floor")]
    DegenerateLikelihood,

    #[error("feature vector contains non-finite values")]
    NonFiniteFeatures,
}

/// Death partition did not sum to `1 - viability`.
///
/// The residual has already been folded into `death_unknown` when this is reported.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountingViolation {
    pub vessel: VesselId,
    pub residual: f64,
    pub death_unknown_after: f64,
}
