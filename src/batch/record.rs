//! Plate assignments and per-well result records

use serde::{Deserialize, Serialize};

use crate::assay::context::WellContext;
use crate::calibration::belief::BeliefState;
use crate::core::types::{FeatureVector, Hours, MechanismClass};
use crate::inference::posterior::MechanismPosterior;
use crate::planner::action::Terminal;
use crate::simulation::vessel::{DeathMode, DeathPartition};

fn default_viability() -> f64 {
    1.0
}

/// One well of a plate design, consumed as-is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellAssignment {
    pub well_id: String,
    pub cell_line: String,
    /// `None` for vehicle wells
    #[serde(default)]
    pub compound: Option<String>,
    /// Dose as a multiple of the compound's IC50
    #[serde(default)]
    pub dose_multiplier: f64,
    #[serde(default = "default_viability")]
    pub initial_viability: f64,
    #[serde(default)]
    pub treat_at_h: Hours,
    /// First observation time; planning starts here. Defaults to the treatment time.
    #[serde(default)]
    pub timepoint_h: Option<Hours>,
    #[serde(default)]
    pub day: u32,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub replicate: u32,
}

impl WellAssignment {
    pub fn context(&self) -> WellContext {
        WellContext {
            cell_line: self.cell_line.clone(),
            day: self.day,
            operator: self.operator.clone(),
            replicate: self.replicate,
        }
    }
}

/// Completed well, as read by downstream consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellResult {
    pub cell_line: String,
    pub compound: Option<String>,
    pub dose_multiplier: f64,
    pub time_h: Hours,
    pub viability: f64,
    pub death_compound: f64,
    pub death_confluence: f64,
    pub death_unknown: f64,
    pub death_mode: DeathMode,
    pub features: FeatureVector,
    /// Posterior at the outcome node, absent when inference was unavailable
    pub posterior: Option<MechanismPosterior>,
    pub calibrated_confidence: Option<f64>,
    pub outcome: Terminal,
    pub predicted_class: Option<MechanismClass>,
    /// Belief snapshot, present only when the well committed
    pub belief: Option<BeliefState>,
    pub inference_unavailable: bool,
    pub elapsed_h: Hours,
    pub measurements: u32,
    pub accounting_violations: usize,
}

impl WellResult {
    pub fn death(&self) -> DeathPartition {
        DeathPartition {
            compound: self.death_compound,
            confluence: self.death_confluence,
            unknown: self.death_unknown,
        }
    }

    pub fn committed(&self) -> bool {
        matches!(self.outcome, Terminal::Commit { .. })
    }
}

/// Per-well outcome: a result or the configuration error that stopped it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WellStatus {
    Completed(Box<WellResult>),
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellOutcome {
    pub well_id: String,
    #[serde(flatten)]
    pub status: WellStatus,
}

impl WellOutcome {
    pub fn result(&self) -> Option<&WellResult> {
        match &self.status {
            WellStatus::Completed(result) => Some(result.as_ref()),
            WellStatus::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            WellStatus::Completed(_) => None,
            WellStatus::Failed { error } => Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_defaults() {
        let assignment: WellAssignment = serde_json::from_str(
            r#"{ "well_id": "A01", "cell_line": "A549", "compound": "cccp", "dose_multiplier": 3.0 }"#,
        )
        .unwrap();
        assert_eq!(assignment.initial_viability, 1.0);
        assert_eq!(assignment.treat_at_h, 0.0);
        assert_eq!(assignment.timepoint_h, None);
        assert_eq!(assignment.context().cell_line, "A549");
    }

    #[test]
    fn test_failed_outcome_serializes_with_status() {
        let outcome = WellOutcome {
            well_id: "B02".into(),
            status: WellStatus::Failed {
                error: "Unknown compound: mystery".into(),
            },
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"status\":\"failed\""));
        assert_eq!(outcome.error(), Some("Unknown compound: mystery"));
    }
}
