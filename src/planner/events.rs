//! Forensic decision log
//!
//! One `COMMIT_CANDIDATE` record per COMMIT node the search materializes,
//! then one decision record per vessel: `COMMIT` for the node that was
//! chosen or `BUDGET_EXHAUSTED` for a forced termination. Records are
//! tab-separated, one per line, under a fixed header.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::calibration::belief::BeliefState;
use crate::core::error::Result;
use crate::core::types::{MechanismClass, VesselId};

pub const DECISION_LOG_HEADER: [&str; 16] = [
    "step",
    "node",
    "vessel",
    "action",
    "predicted_class",
    "top_probability",
    "margin",
    "entropy",
    "nuisance_fraction",
    "timepoint_h",
    "dose_multiplier",
    "viability",
    "calibrated_confidence",
    "utility",
    "threshold",
    "rationale",
];

pub const COMMIT_CANDIDATE: &str = "COMMIT_CANDIDATE";

const MISSING: &str = "NA";

/// Why a branch ended, with everything needed to audit the call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub step: usize,
    /// Arena index of the node within its vessel's search
    pub node: usize,
    pub vessel: VesselId,
    /// `COMMIT_CANDIDATE`, `COMMIT` or `BUDGET_EXHAUSTED`
    pub action: String,
    pub predicted_class: Option<MechanismClass>,
    /// Absent when inference was unavailable
    pub belief: Option<BeliefState>,
    pub utility: f64,
    pub threshold: f64,
    pub rationale: String,
}

impl DecisionEvent {
    /// True for the record that names the vessel's realized outcome
    pub fn is_decision(&self) -> bool {
        self.action != COMMIT_CANDIDATE
    }

    pub fn to_line(&self) -> String {
        let class = self
            .predicted_class
            .map_or_else(|| MISSING.to_string(), |c| c.to_string());

        let belief_fields: Vec<String> = match &self.belief {
            Some(b) => [
                b.top_probability,
                b.margin,
                b.entropy,
                b.nuisance_fraction,
                b.timepoint_h,
                b.dose_multiplier,
                b.viability,
                b.calibrated_confidence,
            ]
            .iter()
            .map(|v| v.to_string())
            .collect(),
            None => vec![MISSING.to_string(); 8],
        };

        let mut fields = vec![
            self.step.to_string(),
            self.node.to_string(),
            sanitize(self.vessel.as_str()),
            sanitize(&self.action),
            class,
        ];
        fields.extend(belief_fields);
        fields.push(self.utility.to_string());
        fields.push(self.threshold.to_string());
        fields.push(sanitize(&self.rationale));
        fields.join("\t")
    }
}

/// Tabs and newlines would break the one-record-per-line format
fn sanitize(field: &str) -> String {
    field.replace(['\t', '\n', '\r'], " ")
}

/// Append-only log of decision events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionLog {
    events: Vec<DecisionEvent>,
}

impl DecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: DecisionEvent) {
        self.events.push(event);
    }

    pub fn extend(&mut self, other: DecisionLog) {
        self.events.extend(other.events);
    }

    pub fn events(&self) -> &[DecisionEvent] {
        &self.events
    }

    /// Final records only, one per vessel searched
    pub fn decisions(&self) -> impl Iterator<Item = &DecisionEvent> {
        self.events.iter().filter(|e| e.is_decision())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn to_tsv(&self) -> String {
        let mut out = DECISION_LOG_HEADER.join("\t");
        out.push('\n');
        for event in &self.events {
            out.push_str(&event.to_line());
            out.push('\n');
        }
        out
    }

    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_tsv())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::belief::BeliefFeatures;

    fn commit_event() -> DecisionEvent {
        let features = BeliefFeatures {
            top_probability: 0.9,
            margin: 0.85,
            entropy: 0.3,
            nuisance_fraction: 0.1,
            timepoint_h: 24.0,
            dose_multiplier: 1.0,
            viability: 0.6,
        };
        DecisionEvent {
            step: 2,
            node: 9,
            vessel: VesselId::new("plate1-A01"),
            action: "COMMIT".into(),
            predicted_class: Some(MechanismClass::ErStress),
            belief: Some(BeliefState::new(features, 0.81)),
            utility: 0.762,
            threshold: 0.7,
            rationale: "calibrated 0.81\tat 24h".into(),
        }
    }

    #[test]
    fn test_line_has_one_field_per_header_column() {
        let line = commit_event().to_line();
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields.len(), DECISION_LOG_HEADER.len());
        assert_eq!(fields[1], "9");
        assert_eq!(fields[4], "er_stress");
        assert_eq!(fields[12], "0.81");
        assert_eq!(fields[15], "calibrated 0.81 at 24h");
    }

    #[test]
    fn test_missing_belief_written_as_na() {
        let mut event = commit_event();
        event.action = "BUDGET_EXHAUSTED".into();
        event.predicted_class = None;
        event.belief = None;
        let line = event.to_line();
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields.len(), DECISION_LOG_HEADER.len());
        assert_eq!(fields[4], "NA");
        assert_eq!(fields[5], "NA");
    }

    #[test]
    fn test_tsv_starts_with_header() {
        let mut log = DecisionLog::new();
        log.push(commit_event());
        let tsv = log.to_tsv();
        let mut lines = tsv.lines();
        assert_eq!(lines.next(), Some(DECISION_LOG_HEADER.join("\t").as_str()));
        assert_eq!(lines.count(), 1);
    }

    #[test]
    fn test_candidates_are_not_decisions() {
        let mut log = DecisionLog::new();
        let mut candidate = commit_event();
        candidate.action = COMMIT_CANDIDATE.into();
        log.push(candidate.clone());
        log.push(candidate);
        log.push(commit_event());
        assert_eq!(log.len(), 3);
        assert_eq!(log.decisions().count(), 1);
        assert_eq!(log.decisions().next().map(|e| e.action.as_str()), Some("COMMIT"));
    }
}
