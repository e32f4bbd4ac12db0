//! Small dense linear algebra in feature space

use crate::core::types::{FeatureArray, FeatureMatrix, FEATURE_DIM};

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Lower-triangular Cholesky factor of a covariance matrix
#[derive(Debug, Clone, PartialEq)]
pub struct Cholesky {
    lower: FeatureMatrix,
    log_det: f64,
}

impl Cholesky {
    /// Factor a symmetric positive-definite matrix; `None` if it is not
    pub fn decompose(matrix: &FeatureMatrix) -> Option<Self> {
        let mut lower = [[0.0; FEATURE_DIM]; FEATURE_DIM];
        for i in 0..FEATURE_DIM {
            for j in 0..=i {
                let mut sum = matrix[i][j];
                for k in 0..j {
                    sum -= lower[i][k] * lower[j][k];
                }
                if i == j {
                    if !(sum > 0.0) || !sum.is_finite() {
                        return None;
                    }
                    lower[i][j] = sum.sqrt();
                } else {
                    lower[i][j] = sum / lower[j][j];
                }
            }
        }
        let log_det = 2.0 * (0..FEATURE_DIM).map(|i| lower[i][i].ln()).sum::<f64>();
        Some(Self { lower, log_det })
    }

    /// Factor, adding a growing ridge to the diagonal if needed
    pub fn decompose_with_ridge(matrix: &FeatureMatrix, attempts: u32) -> Option<Self> {
        if let Some(chol) = Self::decompose(matrix) {
            return Some(chol);
        }
        let scale = (trace(matrix) / FEATURE_DIM as f64).abs().max(1e-12);
        let mut ridge = scale * 1e-9;
        for _ in 0..attempts {
            let mut ridged = *matrix;
            for (i, row) in ridged.iter_mut().enumerate() {
                row[i] += ridge;
            }
            if let Some(chol) = Self::decompose(&ridged) {
                return Some(chol);
            }
            ridge *= 100.0;
        }
        None
    }

    pub fn log_det(&self) -> f64 {
        self.log_det
    }

    /// `dᵀ Σ⁻¹ d` via forward substitution
    pub fn mahalanobis_sq(&self, diff: &FeatureArray) -> f64 {
        let mut y = [0.0; FEATURE_DIM];
        for i in 0..FEATURE_DIM {
            let mut sum = diff[i];
            for k in 0..i {
                sum -= self.lower[i][k] * y[k];
            }
            y[i] = sum / self.lower[i][i];
        }
        y.iter().map(|v| v * v).sum()
    }

    /// Multivariate normal log density of `x`
    pub fn log_pdf(&self, x: &FeatureArray, mean: &FeatureArray) -> f64 {
        let diff = sub(x, mean);
        -0.5 * (FEATURE_DIM as f64 * LN_2PI + self.log_det + self.mahalanobis_sq(&diff))
    }
}

pub fn sub(a: &FeatureArray, b: &FeatureArray) -> FeatureArray {
    let mut out = [0.0; FEATURE_DIM];
    for (i, value) in out.iter_mut().enumerate() {
        *value = a[i] - b[i];
    }
    out
}

pub fn trace(matrix: &FeatureMatrix) -> f64 {
    (0..FEATURE_DIM).map(|i| matrix[i][i]).sum()
}

pub fn diagonal(values: &FeatureArray) -> FeatureMatrix {
    let mut out = [[0.0; FEATURE_DIM]; FEATURE_DIM];
    for (i, value) in values.iter().enumerate() {
        out[i][i] = *value;
    }
    out
}

pub fn add_diagonal(matrix: &FeatureMatrix, values: &FeatureArray) -> FeatureMatrix {
    let mut out = *matrix;
    for (i, value) in values.iter().enumerate() {
        out[i][i] += value;
    }
    out
}

/// Univariate normal log density
pub fn normal_log_pdf(x: f64, mean: f64, variance: f64) -> f64 {
    let d = x - mean;
    -0.5 * (LN_2PI + variance.ln() + d * d / variance)
}

/// Sample mean and unbiased covariance; `None` with fewer than two samples
pub fn mean_and_covariance(samples: &[FeatureArray]) -> Option<(FeatureArray, FeatureMatrix)> {
    if samples.len() < 2 {
        return None;
    }
    let n = samples.len() as f64;
    let mut mean = [0.0; FEATURE_DIM];
    for sample in samples {
        for (m, v) in mean.iter_mut().zip(sample.iter()) {
            *m += v;
        }
    }
    for m in mean.iter_mut() {
        *m /= n;
    }

    let mut cov = [[0.0; FEATURE_DIM]; FEATURE_DIM];
    for sample in samples {
        let d = sub(sample, &mean);
        for i in 0..FEATURE_DIM {
            for j in 0..FEATURE_DIM {
                cov[i][j] += d[i] * d[j];
            }
        }
    }
    for row in cov.iter_mut() {
        for value in row.iter_mut() {
            *value /= n - 1.0;
        }
    }
    Some((mean, cov))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_log_det_is_zero() {
        let chol = Cholesky::decompose(&diagonal(&[1.0; FEATURE_DIM])).unwrap();
        assert!(chol.log_det().abs() < 1e-12);
        let d = [1.0, 0.0, 0.0, 0.0, 0.0];
        assert!((chol.mahalanobis_sq(&d) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_diagonal_log_pdf_matches_univariate_sum() {
        let variances = [0.5, 2.0, 1.0, 0.1, 3.0];
        let chol = Cholesky::decompose(&diagonal(&variances)).unwrap();
        let x = [0.3, -1.0, 0.2, 0.05, 1.5];
        let mean = [0.0; FEATURE_DIM];
        let expected: f64 = (0..FEATURE_DIM)
            .map(|i| normal_log_pdf(x[i], 0.0, variances[i]))
            .sum();
        assert!((chol.log_pdf(&x, &mean) - expected).abs() < 1e-10);
    }

    #[test]
    fn test_correlated_mahalanobis() {
        let mut m = diagonal(&[1.0; FEATURE_DIM]);
        m[0][1] = 0.8;
        m[1][0] = 0.8;
        let chol = Cholesky::decompose(&m).unwrap();
        // Along the correlation the distance is shorter than against it
        let along = chol.mahalanobis_sq(&[1.0, 1.0, 0.0, 0.0, 0.0]);
        let against = chol.mahalanobis_sq(&[1.0, -1.0, 0.0, 0.0, 0.0]);
        assert!(along < against);
    }

    #[test]
    fn test_singular_matrix_needs_ridge() {
        let mut m = [[0.0; FEATURE_DIM]; FEATURE_DIM];
        m[0][0] = 1.0;
        assert!(Cholesky::decompose(&m).is_none());
        assert!(Cholesky::decompose_with_ridge(&m, 8).is_some());
    }

    #[test]
    fn test_mean_and_covariance() {
        let samples = vec![
            [1.0, 0.0, 0.0, 0.0, 0.0],
            [3.0, 0.0, 0.0, 0.0, 0.0],
        ];
        let (mean, cov) = mean_and_covariance(&samples).unwrap();
        assert_eq!(mean[0], 2.0);
        assert_eq!(cov[0][0], 2.0);
        assert_eq!(cov[1][1], 0.0);
        assert!(mean_and_covariance(&samples[..1]).is_none());
    }
}
