//! Parallel batch over independent wells
//!
//! Each well seeds its own vessel from its own id, so wells share nothing
//! mutable and run on rayon's pool without locking. Results are collected
//! in assignment order regardless of scheduling.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::batch::record::{WellAssignment, WellOutcome, WellResult, WellStatus};
use crate::core::error::{LabError, Result};
use crate::core::types::VesselId;
use crate::pipeline::Pipeline;
use crate::planner::action::Terminal;
use crate::planner::environment::PlanningEnvironment;
use crate::planner::events::DecisionLog;

/// Summary counts over one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub wells: usize,
    pub committed: usize,
    pub budget_exhausted: usize,
    pub inference_unavailable: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<WellOutcome>,
    pub summary: BatchSummary,
    #[serde(skip)]
    pub log: DecisionLog,
}

impl BatchReport {
    pub fn save_json(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn results(&self) -> impl Iterator<Item = &WellResult> {
        self.outcomes.iter().filter_map(|o| o.result())
    }
}

/// Read a plate assignment list from JSON
pub fn load_assignments(path: &Path) -> Result<Vec<WellAssignment>> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

pub struct BatchRunner<'a> {
    pipeline: &'a Pipeline,
}

impl<'a> BatchRunner<'a> {
    pub fn new(pipeline: &'a Pipeline) -> Self {
        Self { pipeline }
    }

    /// Run every well; a failing well is reported, never fatal to the batch
    pub fn run(&self, assignments: &[WellAssignment]) -> BatchReport {
        let runs: Vec<(WellOutcome, DecisionLog)> = assignments
            .par_iter()
            .map(|assignment| match self.run_well(assignment) {
                Ok((result, log)) => (
                    WellOutcome {
                        well_id: assignment.well_id.clone(),
                        status: WellStatus::Completed(Box::new(result)),
                    },
                    log,
                ),
                Err(err) => {
                    warn!(well = %assignment.well_id, error = %err, "Well failed");
                    (
                        WellOutcome {
                            well_id: assignment.well_id.clone(),
                            status: WellStatus::Failed {
                                error: err.to_string(),
                            },
                        },
                        DecisionLog::new(),
                    )
                }
            })
            .collect();

        let mut summary = BatchSummary {
            wells: runs.len(),
            ..BatchSummary::default()
        };
        let mut outcomes = Vec::with_capacity(runs.len());
        let mut log = DecisionLog::new();
        for (outcome, well_log) in runs {
            match outcome.result() {
                Some(result) if result.committed() => summary.committed += 1,
                Some(result) => {
                    summary.budget_exhausted += 1;
                    if result.inference_unavailable {
                        summary.inference_unavailable += 1;
                    }
                }
                None => summary.failed += 1,
            }
            log.extend(well_log);
            outcomes.push(outcome);
        }

        info!(
            wells = summary.wells,
            committed = summary.committed,
            budget_exhausted = summary.budget_exhausted,
            inference_unavailable = summary.inference_unavailable,
            failed = summary.failed,
            "Batch complete"
        );

        BatchReport {
            outcomes,
            summary,
            log,
        }
    }

    /// Seed, treat, plan and report one well
    pub fn run_well(&self, assignment: &WellAssignment) -> Result<(WellResult, DecisionLog)> {
        let substrate = self.pipeline.substrate();
        let id = VesselId::new(assignment.well_id.as_str());
        let mut vessel = substrate.seed(id.clone(), &assignment.cell_line, assignment.initial_viability)?;
        let mut violations = 0;

        if let Some(compound) = &assignment.compound {
            let dose_um = assignment.dose_multiplier * substrate.biology().compound(compound)?.ic50_um;
            if substrate
                .treat(&mut vessel, compound, dose_um, assignment.treat_at_h)?
                .is_some()
            {
                violations += 1;
            }
        }

        let start_h = assignment.timepoint_h.unwrap_or(assignment.treat_at_h);
        let now = vessel.state().time_h();
        if start_h < now {
            return Err(LabError::InvalidConfig(format!(
                "well {}: timepoint {}h precedes treatment at {}h",
                assignment.well_id, start_h, now
            )));
        }
        if start_h > now && substrate.advance(&mut vessel, start_h - now).is_some() {
            violations += 1;
        }

        let planner = self.pipeline.planner();
        let root = self.pipeline.environment(vessel, assignment.context());
        let search = planner.search(&id, root.clone());
        let last = planner.replay(root, &search);

        let state = last.vessel().state();
        let posterior = last.posterior().ok();
        let committed = matches!(search.terminal, Terminal::Commit { .. });
        let inference_unavailable = match search.terminal {
            Terminal::BudgetExhausted {
                inference_unavailable,
            } => inference_unavailable,
            Terminal::Commit { .. } => false,
        } || posterior.is_none();

        let death = state.death();
        let result = WellResult {
            cell_line: assignment.cell_line.clone(),
            compound: assignment.compound.clone(),
            dose_multiplier: assignment.dose_multiplier,
            time_h: state.time_h(),
            viability: state.viability(),
            death_compound: death.compound,
            death_confluence: death.confluence,
            death_unknown: death.unknown,
            death_mode: state.death_mode(),
            features: last.observation().features,
            posterior,
            calibrated_confidence: search.belief.map(|b| b.calibrated_confidence),
            outcome: search.terminal,
            predicted_class: search.terminal.predicted_class(),
            belief: if committed { search.belief } else { None },
            inference_unavailable,
            elapsed_h: last.elapsed_h(),
            measurements: last.measurements(),
            accounting_violations: violations + last.violations().len(),
        };

        Ok((result, search.log))
    }
}
