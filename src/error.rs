//! Error types for the PCA core.

use thiserror::Error;

/// Errors surfaced by fitting, transforming and diagnosing PCA models.
///
/// All failures are terminal for the call that produced them; nothing is
/// retried internally. NIPALS hitting its iteration cap is not an error and
/// is reported through [`crate::PcaModel::converged`] instead.
#[derive(Debug, Error)]
pub enum PcaError {
    /// The configuration is inconsistent with itself or with the data shape
    /// (non-positive component count, too many components, unsupported
    /// method/kernel combination, missing values without a strategy).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested number of components exceeds the effective rank of the
    /// working matrix. The caller may retry with fewer components.
    #[error("rank deficient: requested {requested} components but effective rank is {effective}")]
    RankDeficient { requested: usize, effective: usize },

    /// Input shape disagrees with the fitted model.
    #[error("dimension mismatch: expected {expected} columns, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The operation is undefined for the model's method, e.g. Q residuals
    /// against a kernel model that has no loadings.
    #[error("operation not supported for {0} models")]
    UnsupportedForMethod(&'static str),

    /// Kernel transform was requested against a model fitted without
    /// retained training data.
    #[error("kernel transform requires retained training data; fit with retain_training_data")]
    MissingTrainingData,

    /// NaN or infinity appeared in an intermediate result that the
    /// configured missing-value strategy does not account for, or a linear
    /// algebra backend operation failed.
    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PcaError>;
