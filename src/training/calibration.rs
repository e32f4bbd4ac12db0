//! Stratified calibrator training
//!
//! Wells are simulated under each nuisance scale (low to high batch
//! effects), run through the posterior, and labeled by whether the top
//! class matched the compound's true axis. Even replicates train the
//! calibrator; odd replicates are held out for the gates.

use tracing::{debug, warn};

use crate::assay::measurement::Assay;
use crate::calibration::belief::BeliefFeatures;
use crate::calibration::calibrator::{
    CalibrationModel, Calibrator, CalibratorArtifact, FitOptions, LogisticCalibrator,
};
use crate::calibration::metrics::{CalibrationGateReport, CalibrationSample};
use crate::core::config::{LabConfig, TrainingConfig};
use crate::core::error::{LabError, Result};
use crate::inference::nuisance::NuisanceEstimator;
use crate::inference::posterior::PosteriorEngine;
use crate::inference::signature::SignatureSet;
use crate::simulation::biology::BiologyTable;
use crate::simulation::substrate::Substrate;
use crate::training::{simulate_grid, training_grid, TrainingWell};

/// A labeled belief and the replicate it came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabeledBelief {
    pub sample: CalibrationSample,
    pub replicate: u32,
}

/// Labeled beliefs across all strata, plus the count of wells with no posterior
pub fn simulate_calibration_samples(
    config: &LabConfig,
    biology: &BiologyTable,
    signatures: &SignatureSet,
) -> Result<(Vec<LabeledBelief>, usize)> {
    let mut scales = config.training.nuisance_scales.clone();
    scales.sort_by(f64::total_cmp);

    let substrate = Substrate::new(biology.clone(), config.substrate.clone(), config.base_seed);
    let engine = PosteriorEngine::new(signatures.clone(), config.posterior.clone());
    let mechanism_variance = signatures.mean_trace();

    let wells = training_grid(biology, &config.training, scales.len());
    let mut beliefs = Vec::with_capacity(wells.len());
    let mut skipped = 0;

    for (stratum, scale) in scales.iter().enumerate() {
        let effects = config.context.with_batch_scale(*scale);
        let assay = Assay::new(biology.clone(), config.assay.clone(), effects.clone());
        let estimator = NuisanceEstimator::new(effects, config.assay.confluence_noise);

        let stratum_wells: Vec<TrainingWell> = wells.iter().filter(|w| w.stratum == stratum).cloned().collect();
        let observed = simulate_grid(&substrate, &assay, &stratum_wells, "calibration")?;

        for (well, (state, observation)) in stratum_wells.iter().zip(observed.iter()) {
            let nuisance = estimator.estimate(observation, mechanism_variance);
            let posterior = match engine.posterior(&observation.features, &nuisance) {
                Ok(posterior) => posterior,
                Err(reason) => {
                    debug!(compound = %well.compound, %reason, "No posterior for training well");
                    skipped += 1;
                    continue;
                }
            };
            let dose_multiplier = state.dominant_exposure().map_or(0.0, |e| e.dose_multiplier);
            beliefs.push(LabeledBelief {
                sample: CalibrationSample {
                    features: BeliefFeatures::from_posterior(
                        &posterior,
                        observation.timepoint_h,
                        dose_multiplier,
                        observation.viability,
                    ),
                    correct: posterior.top_class == well.class,
                    stratum,
                },
                replicate: well.replicate,
            });
        }
        debug!(stratum, scale, "Simulated calibration stratum");
    }

    Ok((beliefs, skipped))
}

/// Fit the logistic model, then make the highest stratum conservative
pub fn fit_calibrator(label: &str, samples: &[CalibrationSample], training: &TrainingConfig) -> Result<CalibratorArtifact> {
    if samples.is_empty() {
        return Err(LabError::InvalidConfig("no calibration samples to fit".into()));
    }
    let pairs: Vec<(BeliefFeatures, bool)> = samples.iter().map(|s| (s.features, s.correct)).collect();
    let mut model = LogisticCalibrator::fit(
        &pairs,
        FitOptions {
            learning_rate: training.learning_rate,
            iterations: training.iterations,
            l2: training.l2,
        },
    );

    let top = samples.iter().map(|s| s.stratum).max().unwrap_or(0);
    let high: Vec<(BeliefFeatures, bool)> = samples
        .iter()
        .filter(|s| s.stratum == top)
        .map(|s| (s.features, s.correct))
        .collect();
    if !model.enforce_conservatism(&high, training.conservatism_step, training.conservatism_max_steps) {
        warn!(
            penalty = model.nuisance_penalty,
            "High-nuisance stratum still overconfident after step limit"
        );
    }

    CalibratorArtifact::freeze(label, CalibrationModel::Logistic(model))
}

/// Fitted artifact with its held-out gate report
#[derive(Debug, Clone)]
pub struct CalibratorTraining {
    pub artifact: CalibratorArtifact,
    pub gate: CalibrationGateReport,
    pub train_samples: usize,
    pub holdout_samples: usize,
    pub skipped: usize,
}

pub fn train_calibrator(
    label: &str,
    config: &LabConfig,
    biology: &BiologyTable,
    signatures: &SignatureSet,
) -> Result<CalibratorTraining> {
    let (beliefs, skipped) = simulate_calibration_samples(config, biology, signatures)?;
    let (train, holdout): (Vec<&LabeledBelief>, Vec<&LabeledBelief>) =
        beliefs.iter().partition(|b| b.replicate % 2 == 0);
    let train: Vec<CalibrationSample> = train.iter().map(|b| b.sample).collect();
    let holdout: Vec<CalibrationSample> = holdout.iter().map(|b| b.sample).collect();

    let artifact = fit_calibrator(label, &train, &config.training)?;
    let calibrator = Calibrator::new(artifact.clone(), config.calibration.clone());
    let gate = CalibrationGateReport::evaluate(
        &calibrator,
        &holdout,
        config.training.ece_bins,
        config.training.ece_threshold,
    );
    if !gate.passed() {
        warn!(
            ece = gate.ece,
            threshold = gate.ece_threshold,
            conservative = gate.conservative,
            "Calibrator failed a deployment gate"
        );
    }

    Ok(CalibratorTraining {
        artifact,
        gate,
        train_samples: train.len(),
        holdout_samples: holdout.len(),
        skipped,
    })
}
