//! Confidence calibrator
//!
//! Maps belief features to the probability that the posterior's top class
//! is correct. The model is a frozen, versioned artifact; fitting happens
//! offline and never inside the decision loop.
//!
//! Calibration is allowed to move confidence in either direction relative
//! to the raw posterior. The only structural bias is `nuisance_penalty`, a
//! non-negative weight on the raw nuisance fraction raised offline until
//! the highest-nuisance stratum is no longer overconfident.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::calibration::belief::{BeliefFeatures, BeliefState, CALIBRATION_INPUTS};
use crate::core::config::{ArtifactPolicy, CalibrationConfig};
use crate::core::error::Result;
use crate::inference::signature::{content_digest, verify_version};

pub const CALIBRATOR_ARTIFACT: &str = "calibrator";

/// Linear-in-features logistic model over standardized inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticCalibrator {
    pub means: [f64; CALIBRATION_INPUTS],
    pub scales: [f64; CALIBRATION_INPUTS],
    pub weights: [f64; CALIBRATION_INPUTS],
    pub bias: f64,
    /// Subtracted per unit of raw nuisance fraction, never negative
    pub nuisance_penalty: f64,
}

/// Optimizer settings for [`LogisticCalibrator::fit`]
#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    pub learning_rate: f64,
    pub iterations: usize,
    pub l2: f64,
}

impl LogisticCalibrator {
    /// Fit by full-batch gradient descent; deterministic for a given sample order
    pub fn fit(samples: &[(BeliefFeatures, bool)], options: FitOptions) -> Self {
        let n = samples.len().max(1) as f64;
        let rows: Vec<[f64; CALIBRATION_INPUTS]> = samples.iter().map(|(f, _)| f.to_array()).collect();

        let mut means = [0.0; CALIBRATION_INPUTS];
        for row in &rows {
            for (m, v) in means.iter_mut().zip(row.iter()) {
                *m += v / n;
            }
        }
        let mut scales = [0.0; CALIBRATION_INPUTS];
        for row in &rows {
            for i in 0..CALIBRATION_INPUTS {
                scales[i] += (row[i] - means[i]).powi(2) / n;
            }
        }
        for s in scales.iter_mut() {
            *s = if *s > 1e-18 { s.sqrt() } else { 1.0 };
        }

        let standardized: Vec<[f64; CALIBRATION_INPUTS]> = rows
            .iter()
            .map(|row| {
                let mut z = [0.0; CALIBRATION_INPUTS];
                for i in 0..CALIBRATION_INPUTS {
                    z[i] = (row[i] - means[i]) / scales[i];
                }
                z
            })
            .collect();

        let positives = samples.iter().filter(|(_, y)| *y).count() as f64;
        let base_rate = (positives / n).clamp(1e-3, 1.0 - 1e-3);
        let mut bias = (base_rate / (1.0 - base_rate)).ln();
        let mut weights = [0.0; CALIBRATION_INPUTS];

        for _ in 0..options.iterations {
            let mut grad_w = [0.0; CALIBRATION_INPUTS];
            let mut grad_b = 0.0;
            for (z, (_, y)) in standardized.iter().zip(samples.iter()) {
                let logit = bias + dot(&weights, z);
                let err = sigmoid(logit) - if *y { 1.0 } else { 0.0 };
                for i in 0..CALIBRATION_INPUTS {
                    grad_w[i] += err * z[i] / n;
                }
                grad_b += err / n;
            }
            for i in 0..CALIBRATION_INPUTS {
                weights[i] -= options.learning_rate * (grad_w[i] + options.l2 * weights[i]);
            }
            bias -= options.learning_rate * grad_b;
        }

        Self {
            means,
            scales,
            weights,
            bias,
            nuisance_penalty: 0.0,
        }
    }

    pub fn logit(&self, features: &BeliefFeatures) -> f64 {
        let x = features.to_array();
        let mut z = 0.0;
        for i in 0..CALIBRATION_INPUTS {
            z += self.weights[i] * (x[i] - self.means[i]) / self.scales[i];
        }
        self.bias + z - self.nuisance_penalty * features.nuisance_fraction
    }

    pub fn probability(&self, features: &BeliefFeatures) -> f64 {
        sigmoid(self.logit(features))
    }

    /// Raise the nuisance penalty until mean confidence on `stratum` is at most its accuracy
    ///
    /// Returns whether the stratum ended up conservative.
    pub fn enforce_conservatism(
        &mut self,
        stratum: &[(BeliefFeatures, bool)],
        step: f64,
        max_steps: usize,
    ) -> bool {
        if stratum.is_empty() {
            return true;
        }
        let accuracy = stratum.iter().filter(|(_, y)| *y).count() as f64 / stratum.len() as f64;
        for steps in 0..=max_steps {
            let mean_confidence = stratum
                .iter()
                .map(|(f, _)| self.probability(f))
                .sum::<f64>()
                / stratum.len() as f64;
            if mean_confidence <= accuracy {
                debug!(steps, penalty = self.nuisance_penalty, mean_confidence, accuracy, "Stratum conservative");
                return true;
            }
            if steps < max_steps {
                self.nuisance_penalty += step;
            }
        }
        false
    }
}

/// Calibration model implementations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CalibrationModel {
    Logistic(LogisticCalibrator),
    /// Raw top-class probability, uncalibrated
    Passthrough,
}

/// Frozen calibrator with its version stamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratorArtifact {
    pub version: String,
    pub model: CalibrationModel,
}

impl CalibratorArtifact {
    pub fn freeze(label: &str, model: CalibrationModel) -> Result<Self> {
        let digest = content_digest(&model)?;
        Ok(Self {
            version: format!("{}-{}", label, digest),
            model,
        })
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn verify(&self, policy: &ArtifactPolicy) -> Result<()> {
        verify_version(
            CALIBRATOR_ARTIFACT,
            &self.version,
            &content_digest(&self.model)?,
            &policy.accepted_calibrator_versions,
        )
    }
}

/// Read-only calibrator used at decision time
#[derive(Debug, Clone)]
pub struct Calibrator {
    artifact: CalibratorArtifact,
    config: CalibrationConfig,
}

impl Calibrator {
    pub fn new(artifact: CalibratorArtifact, config: CalibrationConfig) -> Self {
        Self { artifact, config }
    }

    pub fn version(&self) -> &str {
        &self.artifact.version
    }

    /// Probability that the top class is correct, always within [0, 1]
    pub fn calibrate(&self, features: &BeliefFeatures) -> f64 {
        let raw = match &self.artifact.model {
            CalibrationModel::Logistic(model) => model.probability(features),
            CalibrationModel::Passthrough => features.top_probability,
        };
        if !raw.is_finite() {
            return 0.0;
        }
        let mut confidence = raw.clamp(0.0, 1.0);
        if self.config.high_nuisance_cap
            && features.nuisance_fraction >= self.config.high_nuisance_threshold
        {
            confidence = confidence.min(features.top_probability.clamp(0.0, 1.0));
        }
        confidence
    }

    pub fn belief(&self, features: BeliefFeatures) -> BeliefState {
        BeliefState::new(features, self.calibrate(&features))
    }
}

fn dot(a: &[f64; CALIBRATION_INPUTS], b: &[f64; CALIBRATION_INPUTS]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(top: f64, nuisance: f64) -> BeliefFeatures {
        BeliefFeatures {
            top_probability: top,
            margin: top - (1.0 - top) / 2.0,
            entropy: 0.5,
            nuisance_fraction: nuisance,
            timepoint_h: 24.0,
            dose_multiplier: 1.0,
            viability: 0.8,
        }
    }

    fn separable_samples() -> Vec<(BeliefFeatures, bool)> {
        let mut samples = Vec::new();
        for i in 0..200 {
            let top = 0.34 + 0.66 * (i as f64 / 199.0);
            samples.push((features(top, 0.1), top > 0.6));
        }
        samples
    }

    fn options() -> FitOptions {
        FitOptions {
            learning_rate: 0.5,
            iterations: 500,
            l2: 1e-3,
        }
    }

    #[test]
    fn test_fit_learns_direction() {
        let model = LogisticCalibrator::fit(&separable_samples(), options());
        assert!(model.probability(&features(0.95, 0.1)) > 0.8);
        assert!(model.probability(&features(0.4, 0.1)) < 0.2);
    }

    #[test]
    fn test_extreme_inputs_stay_in_unit_interval() {
        let model = LogisticCalibrator::fit(&separable_samples(), options());
        let calibrator = Calibrator::new(
            CalibratorArtifact::freeze("cal", CalibrationModel::Logistic(model)).unwrap(),
            CalibrationConfig::default(),
        );
        let p = calibrator.calibrate(&features(0.97, 1.0));
        assert!((0.0..=1.0).contains(&p));
        let p = calibrator.calibrate(&features(f64::NAN, 1.0));
        assert_eq!(p, 0.0);
    }

    #[test]
    fn test_conservatism_penalty_lowers_stratum_confidence() {
        let mut model = LogisticCalibrator::fit(&separable_samples(), options());
        // High-nuisance beliefs that look confident but are right only half the time
        let stratum: Vec<(BeliefFeatures, bool)> = (0..40)
            .map(|i| (features(0.9, 0.9), i % 2 == 0))
            .collect();
        assert!(model.enforce_conservatism(&stratum, 0.25, 400));
        let mean: f64 = stratum.iter().map(|(f, _)| model.probability(f)).sum::<f64>() / 40.0;
        assert!(mean <= 0.5);
        assert!(model.nuisance_penalty > 0.0);
    }

    #[test]
    fn test_passthrough_returns_raw_top_probability() {
        let calibrator = Calibrator::new(
            CalibratorArtifact::freeze("raw", CalibrationModel::Passthrough).unwrap(),
            CalibrationConfig::default(),
        );
        assert_eq!(calibrator.calibrate(&features(0.73, 0.2)), 0.73);
    }

    #[test]
    fn test_high_nuisance_cap_bounds_by_raw_posterior() {
        let mut model = LogisticCalibrator::fit(&separable_samples(), options());
        model.bias += 10.0;
        let artifact = CalibratorArtifact::freeze("cal", CalibrationModel::Logistic(model)).unwrap();

        let uncapped = Calibrator::new(artifact.clone(), CalibrationConfig::default());
        let capped = Calibrator::new(
            artifact,
            CalibrationConfig {
                high_nuisance_cap: true,
                ..CalibrationConfig::default()
            },
        );
        let belief = features(0.5, 0.8);
        assert!(uncapped.calibrate(&belief) > 0.5);
        assert_eq!(capped.calibrate(&belief), 0.5);
    }

    #[test]
    fn test_artifact_version_verifies() {
        let artifact = CalibratorArtifact::freeze("cal-v1", CalibrationModel::Passthrough).unwrap();
        assert!(artifact.verify(&ArtifactPolicy::default()).is_ok());
        let mut unversioned = artifact.clone();
        unversioned.version = " ".into();
        assert!(unversioned.verify(&ArtifactPolicy::default()).is_err());
    }

    #[test]
    fn test_sigmoid_symmetric_and_stable() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!((sigmoid(3.0) + sigmoid(-3.0) - 1.0).abs() < 1e-15);
        assert!(sigmoid(-1000.0) >= 0.0);
        assert!(sigmoid(1000.0) <= 1.0);
    }
}
