//! Measurement layer
//!
//! Observations read vessel state through a shared reference and draw
//! noise from the vessel's assay stream only.

pub mod context;
pub mod measurement;

pub use context::WellContext;
pub use measurement::{Assay, Observation};
