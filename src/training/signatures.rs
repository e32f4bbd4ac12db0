//! Learn per-class mean and full covariance from clean-context simulation

use std::collections::BTreeMap;
use tracing::debug;

use crate::assay::measurement::Assay;
use crate::core::config::{ContextEffects, LabConfig};
use crate::core::error::{InferenceUnavailable, Result};
use crate::core::types::{FeatureArray, MechanismClass};
use crate::inference::linalg::mean_and_covariance;
use crate::inference::signature::{MechanismSignature, SignatureSet, SignatureShape};
use crate::simulation::biology::BiologyTable;
use crate::simulation::substrate::Substrate;
use crate::training::{simulate_grid, training_grid};

/// Labeled feature vectors, one per simulated well, no batch or density effects
pub fn simulate_signature_samples(
    config: &LabConfig,
    biology: &BiologyTable,
) -> Result<Vec<(MechanismClass, FeatureArray)>> {
    let substrate = Substrate::new(biology.clone(), config.substrate.clone(), config.base_seed);
    let assay = Assay::new(biology.clone(), config.assay.clone(), ContextEffects::clean());
    let wells = training_grid(biology, &config.training, 1);
    let observed = simulate_grid(&substrate, &assay, &wells, "signature")?;
    Ok(wells
        .iter()
        .zip(observed.iter())
        .map(|(well, (_, observation))| (well.class, observation.features.0))
        .collect())
}

/// Fit one full-covariance signature per class present in `samples`
///
/// Classes with fewer than two samples are dropped; fewer than two usable
/// classes leaves nothing to discriminate between.
pub fn fit_signatures(label: &str, samples: &[(MechanismClass, FeatureArray)]) -> Result<SignatureSet> {
    let mut by_class: BTreeMap<MechanismClass, Vec<FeatureArray>> = BTreeMap::new();
    for (class, features) in samples {
        by_class.entry(*class).or_default().push(*features);
    }

    let signatures: Vec<MechanismSignature> = by_class
        .iter()
        .filter_map(|(class, rows)| {
            let (mean, covariance) = mean_and_covariance(rows)?;
            debug!(class = %class, samples = rows.len(), "Fitted signature");
            Some(MechanismSignature {
                class: *class,
                mean,
                shape: SignatureShape::Full { covariance },
                samples: rows.len(),
            })
        })
        .collect();

    if signatures.len() < 2 {
        return Err(InferenceUnavailable::TooFewClasses {
            found: signatures.len(),
        }
        .into());
    }
    SignatureSet::freeze(label, signatures)
}

pub fn train_signatures(label: &str, config: &LabConfig, biology: &BiologyTable) -> Result<SignatureSet> {
    let samples = simulate_signature_samples(config, biology)?;
    fit_signatures(label, &samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::LabError;

    #[test]
    fn test_single_class_is_too_few() {
        let samples = vec![
            (MechanismClass::ErStress, [1.0, 0.0, 0.0, 0.0, 0.0]),
            (MechanismClass::ErStress, [1.2, 0.1, 0.0, 0.0, 0.0]),
        ];
        let err = fit_signatures("sig", &samples).unwrap_err();
        assert!(matches!(
            err,
            LabError::Inference(InferenceUnavailable::TooFewClasses { found: 1 })
        ));
    }

    #[test]
    fn test_class_with_one_sample_dropped() {
        let samples = vec![
            (MechanismClass::ErStress, [1.0, 0.0, 0.0, 0.0, 0.0]),
            (MechanismClass::ErStress, [1.2, 0.1, 0.0, 0.0, 0.0]),
            (MechanismClass::Mitochondrial, [0.0, -1.0, 0.0, 0.0, 0.0]),
            (MechanismClass::Mitochondrial, [0.1, -1.3, 0.0, 0.1, 0.0]),
            (MechanismClass::Microtubule, [0.0, 0.0, 1.0, -1.0, 0.0]),
        ];
        let set = fit_signatures("sig", &samples).unwrap();
        assert_eq!(
            set.classes(),
            vec![MechanismClass::Mitochondrial, MechanismClass::ErStress]
        );
        assert!(set.version.starts_with("sig-"));
    }
}
