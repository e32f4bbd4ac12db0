//! Offline learning from simulation
//!
//! Produces the two frozen artifacts the runtime consumes: the mechanism
//! signature set and the confidence calibrator. Nothing here runs inside
//! the decision loop.

pub mod calibration;
pub mod signatures;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::assay::context::WellContext;
use crate::assay::measurement::{Assay, Observation};
use crate::calibration::calibrator::CalibratorArtifact;
use crate::calibration::metrics::CalibrationGateReport;
use crate::core::config::{LabConfig, TrainingConfig};
use crate::core::error::{LabError, Result};
use crate::core::types::{Hours, MechanismClass, VesselId};
use crate::inference::signature::SignatureSet;
use crate::simulation::biology::BiologyTable;
use crate::simulation::substrate::Substrate;
use crate::simulation::vessel::VesselState;

/// One simulated training well
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingWell {
    pub compound: String,
    pub class: MechanismClass,
    pub cell_line: String,
    pub dose_multiplier: f64,
    pub timepoint_h: Hours,
    pub replicate: u32,
    /// Index into the ascending nuisance scales
    pub stratum: usize,
}

impl TrainingWell {
    fn vessel_id(&self, prefix: &str) -> VesselId {
        VesselId::new(format!(
            "{}|s{}|{}|{}|x{}|t{}|r{}",
            prefix, self.stratum, self.compound, self.cell_line, self.dose_multiplier, self.timepoint_h, self.replicate
        ))
    }

    fn context(&self) -> WellContext {
        WellContext {
            cell_line: self.cell_line.clone(),
            day: self.replicate % 3,
            operator: format!("op_{}", self.replicate % 2),
            replicate: self.replicate,
        }
    }
}

/// Full factorial grid: compound × cell line × dose × timepoint × replicate × stratum
pub fn training_grid(biology: &BiologyTable, training: &TrainingConfig, strata: usize) -> Vec<TrainingWell> {
    let mut wells = Vec::new();
    for stratum in 0..strata {
        for compound in biology.compounds() {
            for line in biology.cell_lines() {
                for dose_multiplier in &training.dose_multipliers {
                    for timepoint_h in &training.timepoints_h {
                        for replicate in 0..training.replicates {
                            wells.push(TrainingWell {
                                compound: compound.id.clone(),
                                class: compound.stress_axis,
                                cell_line: line.id.clone(),
                                dose_multiplier: *dose_multiplier,
                                timepoint_h: *timepoint_h,
                                replicate,
                                stratum,
                            });
                        }
                    }
                }
            }
        }
    }
    wells
}

/// Treat at time zero, advance to the timepoint, observe once
pub fn simulate_well(
    substrate: &Substrate,
    assay: &Assay,
    well: &TrainingWell,
    prefix: &str,
) -> Result<(VesselState, Observation)> {
    let mut vessel = substrate.seed(well.vessel_id(prefix), &well.cell_line, 1.0)?;
    let dose_um = well.dose_multiplier * substrate.biology().compound(&well.compound)?.ic50_um;
    substrate.treat(&mut vessel, &well.compound, dose_um, 0.0)?;
    substrate.advance(&mut vessel, well.timepoint_h);
    let observation = assay.observe(&mut vessel, &well.context());
    Ok((vessel.state().clone(), observation))
}

/// Simulate wells in parallel, preserving grid order
pub fn simulate_grid(
    substrate: &Substrate,
    assay: &Assay,
    wells: &[TrainingWell],
    prefix: &str,
) -> Result<Vec<(VesselState, Observation)>> {
    wells
        .par_iter()
        .map(|well| simulate_well(substrate, assay, well, prefix))
        .collect()
}

pub fn validate_training(training: &TrainingConfig) -> Result<()> {
    if training.replicates < 2 {
        return Err(LabError::InvalidConfig(
            "training needs at least two replicates for a held-out split".into(),
        ));
    }
    if training.timepoints_h.is_empty() || training.dose_multipliers.is_empty() {
        return Err(LabError::InvalidConfig(
            "training needs at least one timepoint and one dose multiplier".into(),
        ));
    }
    if training.nuisance_scales.is_empty() {
        return Err(LabError::InvalidConfig("training needs at least one nuisance scale".into()));
    }
    Ok(())
}

/// Both artifacts and the gate report that accompanies them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub signatures: SignatureSet,
    pub calibrator: CalibratorArtifact,
    pub gate: CalibrationGateReport,
    pub train_samples: usize,
    pub holdout_samples: usize,
    /// Wells whose posterior was unavailable and could not be labeled
    pub skipped: usize,
}

/// Learn signatures, then fit and gate the calibrator against them
pub fn train_all(config: &LabConfig, biology: &BiologyTable, label: &str) -> Result<TrainingReport> {
    validate_training(&config.training)?;
    let signatures = signatures::train_signatures(label, config, biology)?;
    info!(
        version = %signatures.version,
        classes = signatures.signatures.len(),
        "Signatures frozen"
    );

    let fitted = calibration::train_calibrator(label, config, biology, &signatures)?;
    info!(
        version = %fitted.artifact.version,
        ece = fitted.gate.ece,
        ece_passed = fitted.gate.ece_passed,
        conservative = fitted.gate.conservative,
        "Calibrator frozen"
    );

    Ok(TrainingReport {
        signatures,
        calibrator: fitted.artifact,
        gate: fitted.gate,
        train_samples: fitted.train_samples,
        holdout_samples: fitted.holdout_samples,
        skipped: fitted.skipped,
    })
}
