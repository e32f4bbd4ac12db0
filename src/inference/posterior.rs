//! Bayesian posterior over mechanism classes

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::config::PosteriorConfig;
use crate::core::error::InferenceUnavailable;
use crate::core::types::{FeatureVector, MechanismClass};
use crate::inference::linalg::sub;
use crate::inference::nuisance::NuisanceModel;
use crate::inference::signature::SignatureSet;

/// Posterior distribution and its summary statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanismPosterior {
    pub probabilities: BTreeMap<MechanismClass, f64>,
    pub top_class: MechanismClass,
    pub top_probability: f64,
    /// Top-1 minus top-2 probability
    pub margin: f64,
    /// Shannon entropy in nats
    pub entropy: f64,
    pub nuisance_fraction: f64,
}

impl MechanismPosterior {
    pub fn probability(&self, class: MechanismClass) -> f64 {
        self.probabilities.get(&class).copied().unwrap_or(0.0)
    }
}

/// Evaluates class likelihoods against a frozen signature set
#[derive(Debug, Clone)]
pub struct PosteriorEngine {
    signatures: SignatureSet,
    config: PosteriorConfig,
}

impl PosteriorEngine {
    pub fn new(signatures: SignatureSet, config: PosteriorConfig) -> Self {
        Self { signatures, config }
    }

    pub fn signatures(&self) -> &SignatureSet {
        &self.signatures
    }

    /// Per-class log-likelihoods after removing the context shift, floor-clamped
    pub fn log_likelihoods(
        &self,
        features: &FeatureVector,
        nuisance: &NuisanceModel,
    ) -> BTreeMap<MechanismClass, f64> {
        let adjusted = sub(features.as_array(), &nuisance.mean_shift);
        let floor = self.config.log_likelihood_floor;
        self.signatures
            .signatures
            .iter()
            .map(|sig| {
                let ll = sig
                    .log_likelihood(&adjusted, &nuisance.variance_inflation)
                    .filter(|v| v.is_finite())
                    .map_or(floor, |v| v.max(floor));
                (sig.class, ll)
            })
            .collect()
    }

    /// Posterior over classes for one observation
    pub fn posterior(
        &self,
        features: &FeatureVector,
        nuisance: &NuisanceModel,
    ) -> Result<MechanismPosterior, InferenceUnavailable> {
        let classes = self.signatures.classes();
        if classes.len() < 2 {
            return Err(InferenceUnavailable::TooFewClasses {
                found: classes.len(),
            });
        }
        if !features.is_finite() {
            return Err(InferenceUnavailable::NonFiniteFeatures);
        }

        let log_likelihoods = self.log_likelihoods(features, nuisance);
        let floor = self.config.log_likelihood_floor;
        if log_likelihoods.values().all(|ll| *ll <= floor) {
            return Err(InferenceUnavailable::DegenerateLikelihood);
        }

        let prior = self.prior(&classes);
        let log_post: Vec<(MechanismClass, f64)> = classes
            .iter()
            .map(|class| {
                let ll = log_likelihoods.get(class).copied().unwrap_or(floor);
                let p = prior.get(class).copied().unwrap_or(0.0);
                (*class, ll + p.ln())
            })
            .collect();

        let max = log_post
            .iter()
            .map(|(_, v)| *v)
            .fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return Err(InferenceUnavailable::DegenerateLikelihood);
        }
        let norm: f64 = log_post.iter().map(|(_, v)| (v - max).exp()).sum();

        let probabilities: BTreeMap<MechanismClass, f64> = log_post
            .iter()
            .map(|(class, v)| (*class, (v - max).exp() / norm))
            .collect();

        Ok(summarize(probabilities, nuisance.fraction))
    }

    /// Configured prior restricted to the available classes, uniform when unset
    fn prior(&self, classes: &[MechanismClass]) -> BTreeMap<MechanismClass, f64> {
        let mut prior: BTreeMap<MechanismClass, f64> = classes
            .iter()
            .map(|class| {
                let weight = self
                    .config
                    .prior
                    .iter()
                    .find(|(c, _)| c == class)
                    .map_or(0.0, |(_, w)| w.max(0.0));
                (*class, weight)
            })
            .collect();

        let total: f64 = prior.values().sum();
        if self.config.prior.is_empty() || !(total > 0.0) {
            let uniform = 1.0 / classes.len() as f64;
            prior.values_mut().for_each(|w| *w = uniform);
        } else {
            prior.values_mut().for_each(|w| *w /= total);
        }
        prior
    }
}

fn summarize(probabilities: BTreeMap<MechanismClass, f64>, nuisance_fraction: f64) -> MechanismPosterior {
    let mut ranked: Vec<(MechanismClass, f64)> = probabilities.iter().map(|(c, p)| (*c, *p)).collect();
    // Stable sort keeps class order for exact ties
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let (top_class, top_probability) = ranked[0];
    let second = ranked.get(1).map_or(0.0, |(_, p)| *p);
    let entropy = probabilities
        .values()
        .filter(|p| **p > 0.0)
        .map(|p| -p * p.ln())
        .sum();

    MechanismPosterior {
        probabilities,
        top_class,
        top_probability,
        margin: top_probability - second,
        entropy,
        nuisance_fraction,
    }
}
