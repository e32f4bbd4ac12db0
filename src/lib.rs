//! cellstress - deterministic cell stress simulation and mechanism calling
//!
//! A simulated vessel is seeded, treated and advanced by the substrate,
//! observed through the assay, scored by the mechanism posterior, given a
//! calibrated confidence, and finally handed to a beam-search planner that
//! decides when to WAIT, RESCUE or COMMIT.

pub mod assay;
pub mod batch;
pub mod calibration;
pub mod core;
pub mod inference;
pub mod pipeline;
pub mod planner;
pub mod simulation;
pub mod training;
