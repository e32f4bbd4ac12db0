//! Shared fixtures for integration tests

#![allow(dead_code)]

use cellstress::calibration::{CalibrationModel, CalibratorArtifact};
use cellstress::core::config::{LabConfig, TrainingConfig};
use cellstress::core::types::{MechanismClass, FEATURE_DIM};
use cellstress::inference::linalg::diagonal;
use cellstress::inference::{MechanismSignature, SignatureSet, SignatureShape};
use cellstress::pipeline::Pipeline;
use cellstress::simulation::BiologyTable;

pub const BIOLOGY: &str = include_str!("../../data/biology.toml");

/// One compound whose instant kill is exactly the Hill potency
pub const HALF_KILL_BIOLOGY: &str = r#"
    [[compounds]]
    id = "halfkill"
    stress_axis = "mitochondrial"
    ic50_um = 4.0
    hill = 2.0
    instant_kill_max = 1.0
    attrition_rate_per_h = 0.0
    dysfunction_tau_h = 6.0

    [[cell_lines]]
    id = "A549"
    sensitivity = 1.0

    [morphology.mitochondrial]
    mean = [0.1, -1.2, 0.0, 0.2, -0.3]
    spread = [0.15, 0.35, 0.1, 0.15, 0.2]
"#;

pub fn biology() -> BiologyTable {
    BiologyTable::from_toml_str(BIOLOGY).expect("bundled biology table should load")
}

pub fn config() -> LabConfig {
    LabConfig {
        base_seed: 7,
        ..LabConfig::default()
    }
}

/// Small grid that still spans every stratum, timepoint and dose bucket
pub fn quick_training_config() -> LabConfig {
    let mut config = config();
    config.training = TrainingConfig {
        replicates: 2,
        timepoints_h: vec![24.0, 48.0],
        dose_multipliers: vec![1.0, 3.0],
        nuisance_scales: vec![0.02, 0.6],
        iterations: 300,
        ..TrainingConfig::default()
    };
    config
}

/// Signatures built directly from the morphology table at typical dysfunction
pub fn signatures(biology: &BiologyTable) -> SignatureSet {
    let dysfunction = 0.8;
    let noise = 0.08f64;
    let signatures = MechanismClass::ALL
        .iter()
        .filter_map(|class| {
            let axis = biology.morphology(*class)?;
            let mut mean = [0.0; FEATURE_DIM];
            let mut variances = [0.0; FEATURE_DIM];
            for c in 0..FEATURE_DIM {
                mean[c] = axis.mean[c] * dysfunction;
                variances[c] = (axis.spread[c] * dysfunction).powi(2) + noise * noise + 0.05;
            }
            Some(MechanismSignature {
                class: *class,
                mean,
                shape: SignatureShape::Full {
                    covariance: diagonal(&variances),
                },
                samples: 0,
            })
        })
        .collect();
    SignatureSet::freeze("fixture", signatures).expect("fixture signatures should freeze")
}

pub fn passthrough_calibrator() -> CalibratorArtifact {
    CalibratorArtifact::freeze("fixture", CalibrationModel::Passthrough)
        .expect("passthrough should freeze")
}

pub fn pipeline() -> Pipeline {
    let biology = biology();
    let signatures = signatures(&biology);
    Pipeline::new(&config(), biology, signatures, passthrough_calibrator())
        .expect("fixture pipeline should build")
}
