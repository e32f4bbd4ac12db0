//! Mechanism posterior
//!
//! Full-covariance Gaussian class likelihoods against frozen signatures,
//! with an explicit nuisance model that removes the estimated context shift
//! and widens every class by the context variance before Bayes' rule.

pub mod linalg;
pub mod nuisance;
pub mod posterior;
pub mod signature;

pub use nuisance::{NuisanceEstimator, NuisanceModel};
pub use posterior::{MechanismPosterior, PosteriorEngine};
pub use signature::{MechanismSignature, SignatureSet, SignatureShape};
