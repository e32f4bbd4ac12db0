pub mod config;
pub mod error;
pub mod types;

pub use config::LabConfig;
pub use error::{AccountingViolation, InferenceUnavailable, LabError, Result};
pub use types::{FeatureChannel, FeatureVector, Hours, MechanismClass, VesselId};
