//! Confidence calibration
//!
//! Turns posterior summaries into a probability that the top class is
//! correct, learned from labeled simulation rather than read off the raw
//! posterior.

pub mod belief;
pub mod calibrator;
pub mod metrics;

pub use belief::{BeliefFeatures, BeliefState};
pub use calibrator::{CalibrationModel, Calibrator, CalibratorArtifact, LogisticCalibrator};
pub use metrics::{CalibrationGateReport, CalibrationSample};
