//! Frozen mechanism signatures
//!
//! A signature set is a versioned artifact produced offline. Its version is
//! `{label}-{digest}` where the digest is a SHA-256 prefix of the
//! serialized signatures, so a set that was edited after freezing is
//! detected on load.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use crate::core::config::ArtifactPolicy;
use crate::core::error::{LabError, Result};
use crate::core::types::{FeatureArray, FeatureMatrix, MechanismClass};
use crate::inference::linalg::{self, Cholesky};

pub const SIGNATURE_ARTIFACT: &str = "signature";

const RIDGE_ATTEMPTS: u32 = 6;

/// Covariance model of one class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum SignatureShape {
    Full { covariance: FeatureMatrix },
    Diagonal { variances: FeatureArray },
}

impl SignatureShape {
    pub fn trace(&self) -> f64 {
        match self {
            SignatureShape::Full { covariance } => linalg::trace(covariance),
            SignatureShape::Diagonal { variances } => variances.iter().sum(),
        }
    }
}

/// Learned feature distribution of one mechanism class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanismSignature {
    pub class: MechanismClass,
    pub mean: FeatureArray,
    pub shape: SignatureShape,
    /// Labeled samples the signature was fitted on
    pub samples: usize,
}

impl MechanismSignature {
    /// Log-likelihood of `x` with extra per-channel variance `inflation`
    ///
    /// `None` when the inflated covariance cannot be factored.
    pub fn log_likelihood(&self, x: &FeatureArray, inflation: &FeatureArray) -> Option<f64> {
        match &self.shape {
            SignatureShape::Full { covariance } => {
                let inflated = linalg::add_diagonal(covariance, inflation);
                let chol = Cholesky::decompose_with_ridge(&inflated, RIDGE_ATTEMPTS)?;
                Some(chol.log_pdf(x, &self.mean))
            }
            SignatureShape::Diagonal { variances } => {
                let mut total = 0.0;
                for i in 0..variances.len() {
                    let variance = variances[i] + inflation[i];
                    if !(variance > 0.0) {
                        return None;
                    }
                    total += linalg::normal_log_pdf(x[i], self.mean[i], variance);
                }
                Some(total)
            }
        }
    }
}

/// Versioned set of signatures, one per class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureSet {
    pub version: String,
    pub signatures: Vec<MechanismSignature>,
}

impl SignatureSet {
    /// Stamp a version derived from the content
    pub fn freeze(label: &str, mut signatures: Vec<MechanismSignature>) -> Result<Self> {
        signatures.sort_by_key(|s| s.class);
        let digest = content_digest(&signatures)?;
        Ok(Self {
            version: format!("{}-{}", label, digest),
            signatures,
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

    /// Refuse unversioned, tampered, or unaccepted artifacts
    pub fn verify(&self, policy: &ArtifactPolicy) -> Result<()> {
        verify_version(
            SIGNATURE_ARTIFACT,
            &self.version,
            &content_digest(&self.signatures)?,
            &policy.accepted_signature_versions,
        )
    }

    pub fn classes(&self) -> Vec<MechanismClass> {
        self.signatures.iter().map(|s| s.class).collect()
    }

    pub fn get(&self, class: MechanismClass) -> Option<&MechanismSignature> {
        self.signatures.iter().find(|s| s.class == class)
    }

    /// Average total variance of a class, the scale nuisance is compared against
    pub fn mean_trace(&self) -> f64 {
        if self.signatures.is_empty() {
            return 0.0;
        }
        self.signatures.iter().map(|s| s.shape.trace()).sum::<f64>() / self.signatures.len() as f64
    }
}

/// SHA-256 prefix (12 hex chars) of a serializable artifact body
pub fn content_digest<T: Serialize>(body: &T) -> Result<String> {
    let json = serde_json::to_string(body)?;
    let digest = Sha256::digest(json.as_bytes());
    Ok(digest.iter().take(6).map(|b| format!("{:02x}", b)).collect())
}

/// Shared version check for frozen artifacts
pub fn verify_version(
    kind: &'static str,
    version: &str,
    digest: &str,
    accepted: &[String],
) -> Result<()> {
    if version.trim().is_empty() {
        return Err(LabError::MissingArtifactVersion { kind });
    }
    if !version.ends_with(&format!("-{}", digest)) {
        return Err(LabError::ArtifactDigestMismatch {
            kind,
            version: version.to_string(),
        });
    }
    if !accepted.is_empty() && !accepted.iter().any(|v| v == version) {
        return Err(LabError::UnrecognizedArtifactVersion {
            kind,
            version: version.to_string(),
        });
    }
    Ok(())
}
