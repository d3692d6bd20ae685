//! Configuration value types for fitting a PCA model.

use serde::{Deserialize, Serialize};

use crate::error::{PcaError, Result};

/// Decomposition algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Singular value decomposition of the working matrix. Deterministic,
    /// the usual choice for complete data.
    Svd,
    /// Nonlinear Iterative Partial Least Squares. Extracts one component at
    /// a time and tolerates missing values natively.
    Nipals,
    /// Kernel PCA on a Gram matrix. Produces no loadings.
    Kernel,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Svd => "svd",
            Method::Nipals => "nipals",
            Method::Kernel => "kernel",
        }
    }
}

/// Column-wise scaling variant applied after row-wise preprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleKind {
    /// No scaling.
    None,
    /// Divide each column by its standard deviation.
    Standard,
    /// Subtract the column median and divide by the interquartile range.
    /// Implies its own centering; `mean_center` is not applied on top.
    Robust,
}

/// How NaN cells in the input are treated before (or within) decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingStrategy {
    /// Reject data containing NaN.
    Error,
    /// Remove every row that contains at least one NaN.
    DropRows,
    /// Replace NaN cells with their column mean.
    MeanImpute,
    /// Replace NaN cells with their column median.
    MedianImpute,
    /// Leave NaN in place; NIPALS skips them in its inner products.
    /// Only valid with [`Method::Nipals`].
    Native,
}

/// Kernel function for [`Method::Kernel`].
///
/// A `gamma` of `0.0` means "unset" and is resolved to `1 / n_features`
/// at fit time for the RBF and polynomial kernels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum KernelKind {
    /// k(x, y) = x . y
    Linear,
    /// k(x, y) = exp(-gamma * ||x - y||^2)
    Rbf { gamma: f64 },
    /// k(x, y) = (gamma * x . y + coef0)^degree
    Poly { gamma: f64, degree: u32, coef0: f64 },
}

/// Confidence level for diagnostic thresholds and confidence ellipses.
///
/// Only these three levels are supported; the ellipse geometry uses a fixed
/// chi-square lookup for 2 degrees of freedom rather than a general inverse
/// CDF, matching the values consumers already depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    #[serde(rename = "0.90")]
    P90,
    #[serde(rename = "0.95")]
    P95,
    #[serde(rename = "0.99")]
    P99,
}

impl ConfidenceLevel {
    /// Chi-square critical value for 2 degrees of freedom.
    pub fn chi_square_2df(&self) -> f64 {
        match self {
            ConfidenceLevel::P90 => 4.605,
            ConfidenceLevel::P95 => 5.991,
            ConfidenceLevel::P99 => 9.210,
        }
    }

    /// The level as a fraction in (0, 1).
    pub fn fraction(&self) -> f64 {
        match self {
            ConfidenceLevel::P90 => 0.90,
            ConfidenceLevel::P95 => 0.95,
            ConfidenceLevel::P99 => 0.99,
        }
    }
}

/// Immutable configuration for a single fit.
///
/// Preprocessing order: row-wise operations (`snv`, `l2_norm`) are applied
/// first, then column-wise operations (`mean_center`, `scale`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaConfig {
    /// Number of components to extract. Must be positive and at most
    /// `min(rows - 1, cols)`.
    pub components: usize,
    pub method: Method,
    /// Subtract column means (ignored for kernel PCA, which centers the
    /// Gram matrix instead; for NIPALS native missing handling the means
    /// are computed over observed cells only).
    pub mean_center: bool,
    pub scale: ScaleKind,
    /// Standard Normal Variate: center and scale each row by its own
    /// statistics. Allowed before kernel PCA, though it changes the kernel's
    /// distance semantics.
    pub snv: bool,
    /// Divide each row by its Euclidean norm.
    pub l2_norm: bool,
    pub missing: MissingStrategy,
    /// Kernel function; required when `method` is [`Method::Kernel`].
    pub kernel: Option<KernelKind>,
    /// Retain the preprocessed training matrix inside the model so kernel
    /// models can transform new data. Costs memory; linear methods never
    /// need it.
    pub retain_training_data: bool,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            components: 2,
            method: Method::Svd,
            mean_center: true,
            scale: ScaleKind::None,
            snv: false,
            l2_norm: false,
            missing: MissingStrategy::Error,
            kernel: None,
            retain_training_data: false,
        }
    }
}

impl PcaConfig {
    /// Validates the configuration against the data shape. Called by
    /// [`crate::fit`]; exposed so callers can fail early.
    pub fn validate(&self, n_samples: usize, n_features: usize) -> Result<()> {
        if n_samples == 0 || n_features == 0 {
            return Err(PcaError::InvalidConfig(
                "data matrix has zero samples or zero features".to_string(),
            ));
        }
        if n_samples < 2 {
            return Err(PcaError::InvalidConfig(format!(
                "insufficient samples: need at least 2, got {}",
                n_samples
            )));
        }
        if self.components == 0 {
            return Err(PcaError::InvalidConfig(
                "number of components must be positive".to_string(),
            ));
        }
        let max_components = (n_samples - 1).min(n_features);
        if self.components > max_components {
            return Err(PcaError::InvalidConfig(format!(
                "too many components requested: maximum {}, got {}",
                max_components, self.components
            )));
        }
        if self.missing == MissingStrategy::Native && self.method != Method::Nipals {
            return Err(PcaError::InvalidConfig(
                "native missing value handling is only supported by NIPALS".to_string(),
            ));
        }
        if self.method == Method::Kernel {
            match self.kernel {
                None => {
                    return Err(PcaError::InvalidConfig(
                        "kernel PCA requires a kernel to be configured".to_string(),
                    ))
                }
                Some(KernelKind::Rbf { gamma }) => {
                    if gamma < 0.0 {
                        return Err(PcaError::InvalidConfig(
                            "gamma must be non-negative for the RBF kernel".to_string(),
                        ));
                    }
                }
                Some(KernelKind::Poly { gamma, degree, .. }) => {
                    if gamma < 0.0 {
                        return Err(PcaError::InvalidConfig(
                            "gamma must be non-negative for the polynomial kernel".to_string(),
                        ));
                    }
                    if degree < 1 {
                        return Err(PcaError::InvalidConfig(
                            "degree must be at least 1 for the polynomial kernel".to_string(),
                        ));
                    }
                }
                Some(KernelKind::Linear) => {}
            }
        } else if self.kernel.is_some() {
            return Err(PcaError::InvalidConfig(format!(
                "kernel parameters are only valid with the kernel method, not {}",
                self.method.as_str()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> PcaConfig {
        PcaConfig::default()
    }

    #[test]
    fn rejects_zero_components() {
        let cfg = PcaConfig {
            components: 0,
            ..base()
        };
        assert!(matches!(
            cfg.validate(10, 4),
            Err(PcaError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_components_above_rank_bound() {
        // 10 samples bound the component count at 9 even with 20 features.
        let cfg = PcaConfig {
            components: 10,
            ..base()
        };
        assert!(matches!(
            cfg.validate(10, 20),
            Err(PcaError::InvalidConfig(_))
        ));
        let cfg = PcaConfig {
            components: 9,
            ..base()
        };
        assert!(cfg.validate(10, 20).is_ok());
    }

    #[test]
    fn rejects_native_missing_outside_nipals() {
        let cfg = PcaConfig {
            missing: MissingStrategy::Native,
            ..base()
        };
        assert!(matches!(
            cfg.validate(10, 4),
            Err(PcaError::InvalidConfig(_))
        ));
    }

    #[test]
    fn kernel_method_requires_kernel() {
        let cfg = PcaConfig {
            method: Method::Kernel,
            ..base()
        };
        assert!(matches!(
            cfg.validate(10, 4),
            Err(PcaError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_negative_gamma() {
        let cfg = PcaConfig {
            method: Method::Kernel,
            kernel: Some(KernelKind::Rbf { gamma: -1.0 }),
            ..base()
        };
        assert!(matches!(
            cfg.validate(10, 4),
            Err(PcaError::InvalidConfig(_))
        ));
    }

    #[test]
    fn chi_square_lookup_matches_reference_table() {
        assert_eq!(ConfidenceLevel::P90.chi_square_2df(), 4.605);
        assert_eq!(ConfidenceLevel::P95.chi_square_2df(), 5.991);
        assert_eq!(ConfidenceLevel::P99.chi_square_2df(), 9.210);
    }
}
