//! Per-well orchestration
//!
//! Consumes plate assignments, produces one result record per well plus
//! the merged decision event log.

pub mod record;
pub mod runner;

pub use record::{WellAssignment, WellOutcome, WellResult, WellStatus};
pub use runner::{load_assignments, BatchReport, BatchRunner, BatchSummary};
