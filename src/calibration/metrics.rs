//! Offline calibration gates
//!
//! Expected Calibration Error over equal-width confidence bins, and the
//! conservatism check on the highest-nuisance stratum.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::calibration::belief::BeliefFeatures;
use crate::calibration::calibrator::Calibrator;

/// One labeled belief state from the training distribution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub features: BeliefFeatures,
    /// Whether the posterior's top class matched the true mechanism
    pub correct: bool,
    /// Nuisance stratum index, higher is noisier
    pub stratum: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub mean_confidence: f64,
    pub accuracy: f64,
}

/// Equal-width reliability bins over [0, 1]; a confidence of exactly 1 lands in the last bin
pub fn reliability_bins(predictions: &[(f64, bool)], bins: usize) -> Vec<ReliabilityBin> {
    let bins = bins.max(1);
    let mut sums = vec![(0usize, 0.0f64, 0usize); bins];
    for (confidence, correct) in predictions {
        let c = confidence.clamp(0.0, 1.0);
        let idx = ((c * bins as f64) as usize).min(bins - 1);
        let slot = &mut sums[idx];
        slot.0 += 1;
        slot.1 += c;
        if *correct {
            slot.2 += 1;
        }
    }

    sums.iter()
        .enumerate()
        .map(|(i, (count, conf_sum, hits))| {
            let (mean_confidence, accuracy) = if *count > 0 {
                (conf_sum / *count as f64, *hits as f64 / *count as f64)
            } else {
                (0.0, 0.0)
            };
            ReliabilityBin {
                lower: i as f64 / bins as f64,
                upper: (i + 1) as f64 / bins as f64,
                count: *count,
                mean_confidence,
                accuracy,
            }
        })
        .collect()
}

/// Count-weighted mean gap between confidence and accuracy
pub fn expected_calibration_error(predictions: &[(f64, bool)], bins: usize) -> f64 {
    if predictions.is_empty() {
        return 0.0;
    }
    let n = predictions.len() as f64;
    reliability_bins(predictions, bins)
        .iter()
        .filter(|b| b.count > 0)
        .map(|b| (b.count as f64 / n) * (b.mean_confidence - b.accuracy).abs())
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StratumSummary {
    pub stratum: usize,
    pub count: usize,
    pub mean_confidence: f64,
    pub accuracy: f64,
    pub mean_nuisance_fraction: f64,
}

pub fn stratum_summaries(calibrator: &Calibrator, samples: &[CalibrationSample]) -> Vec<StratumSummary> {
    let mut groups: BTreeMap<usize, Vec<&CalibrationSample>> = BTreeMap::new();
    for sample in samples {
        groups.entry(sample.stratum).or_default().push(sample);
    }
    groups
        .into_iter()
        .map(|(stratum, group)| {
            let n = group.len() as f64;
            StratumSummary {
                stratum,
                count: group.len(),
                mean_confidence: group.iter().map(|s| calibrator.calibrate(&s.features)).sum::<f64>() / n,
                accuracy: group.iter().filter(|s| s.correct).count() as f64 / n,
                mean_nuisance_fraction: group.iter().map(|s| s.features.nuisance_fraction).sum::<f64>() / n,
            }
        })
        .collect()
}

/// Pass/fail record for the two deployment gates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationGateReport {
    pub ece: f64,
    pub ece_threshold: f64,
    pub ece_passed: bool,
    pub high_nuisance_mean_confidence: f64,
    pub high_nuisance_accuracy: f64,
    pub conservative: bool,
    pub strata: Vec<StratumSummary>,
}

impl CalibrationGateReport {
    pub fn evaluate(
        calibrator: &Calibrator,
        samples: &[CalibrationSample],
        bins: usize,
        ece_threshold: f64,
    ) -> Self {
        let predictions: Vec<(f64, bool)> = samples
            .iter()
            .map(|s| (calibrator.calibrate(&s.features), s.correct))
            .collect();
        let ece = expected_calibration_error(&predictions, bins);
        let strata = stratum_summaries(calibrator, samples);

        let (high_nuisance_mean_confidence, high_nuisance_accuracy) = strata
            .last()
            .map_or((0.0, 0.0), |s| (s.mean_confidence, s.accuracy));

        Self {
            ece,
            ece_threshold,
            ece_passed: ece < ece_threshold,
            high_nuisance_mean_confidence,
            high_nuisance_accuracy,
            conservative: high_nuisance_mean_confidence <= high_nuisance_accuracy,
            strata,
        }
    }

    pub fn passed(&self) -> bool {
        self.ece_passed && self.conservative
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::calibrator::{CalibrationModel, CalibratorArtifact};
    use crate::core::config::CalibrationConfig;

    fn passthrough() -> Calibrator {
        Calibrator::new(
            CalibratorArtifact::freeze("raw", CalibrationModel::Passthrough).unwrap(),
            CalibrationConfig::default(),
        )
    }

    fn sample(top: f64, correct: bool, stratum: usize) -> CalibrationSample {
        CalibrationSample {
            features: BeliefFeatures {
                top_probability: top,
                margin: 0.2,
                entropy: 0.6,
                nuisance_fraction: stratum as f64 * 0.3,
                timepoint_h: 24.0,
                dose_multiplier: 1.0,
                viability: 0.7,
            },
            correct,
            stratum,
        }
    }

    #[test]
    fn test_perfectly_calibrated_has_zero_ece() {
        // 0.75 confidence, 3 of 4 correct
        let preds = vec![(0.75, true), (0.75, true), (0.75, true), (0.75, false)];
        assert!(expected_calibration_error(&preds, 10) < 1e-12);
    }

    #[test]
    fn test_overconfident_ece() {
        let preds = vec![(0.95, false), (0.95, false)];
        assert!((expected_calibration_error(&preds, 10) - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_one_lands_in_last_bin() {
        let bins = reliability_bins(&[(1.0, true)], 10);
        assert_eq!(bins[9].count, 1);
    }

    #[test]
    fn test_gate_flags_overconfident_high_stratum() {
        let mut samples = Vec::new();
        for i in 0..20 {
            samples.push(sample(0.8, i % 5 != 0, 0));
            samples.push(sample(0.9, i % 2 == 0, 2));
        }
        let report = CalibrationGateReport::evaluate(&passthrough(), &samples, 10, 0.1);
        assert_eq!(report.strata.len(), 2);
        assert!((report.high_nuisance_accuracy - 0.5).abs() < 1e-12);
        assert!(!report.conservative);
        assert!(!report.passed());
    }
}
