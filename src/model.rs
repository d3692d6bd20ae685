//! The fitted model: scores, loadings, variance accounting, and the
//! preprocessing parameters needed to project new observations.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::config::{KernelKind, Method};
use crate::error::{PcaError, Result};
use crate::kernel;
use crate::preprocess::{self, PreprocessingParams};

/// Result of a PCA fit. Immutable once produced; consumed by
/// [`transform`](PcaModel::transform) and [`crate::diagnostics`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaModel {
    pub method: Method,
    /// n_samples × k score matrix.
    pub scores: Array2<f64>,
    /// n_features × k loading matrix. Absent for kernel PCA, which has no
    /// loadings in the original variable space.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub loadings: Option<Array2<f64>>,
    /// Per-component eigenvalues of the retained components, descending.
    pub explained_variance: Vec<f64>,
    /// Fraction of total variance per retained component (0..=1).
    pub explained_variance_ratio: Vec<f64>,
    /// Running sum of the ratios.
    pub cumulative_variance: Vec<f64>,
    /// "PC1", "PC2", ...
    pub component_labels: Vec<String>,
    pub preprocessing: PreprocessingParams,
    /// False only when NIPALS hit its iteration cap on some component.
    pub converged: bool,
    /// Column count of the training matrix; transform inputs must match.
    pub n_features: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kernel: Option<KernelModel>,
}

/// Kernel-method state needed to project new observations. Training data is
/// retained only when the fit was configured to keep it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelModel {
    pub kernel: KernelKind,
    pub eigenvalues: Vec<f64>,
    /// n_samples × k unit eigenvectors of the centered Gram matrix.
    pub eigenvectors: Array2<f64>,
    /// Column means of the uncentered training Gram matrix.
    pub col_means: Array1<f64>,
    pub grand_mean: f64,
    /// Preprocessed training rows, required for out-of-sample projection.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub training_data: Option<Array2<f64>>,
}

impl PcaModel {
    pub fn n_components(&self) -> usize {
        self.explained_variance.len()
    }

    /// Projects new observations into the fitted component space, applying
    /// the stored preprocessing parameters first.
    pub fn transform(&self, data: ArrayView2<f64>) -> Result<Array2<f64>> {
        if data.ncols() != self.n_features {
            return Err(PcaError::DimensionMismatch {
                expected: self.n_features,
                actual: data.ncols(),
            });
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(PcaError::NumericalInstability(
                "transform input contains non-finite values".to_string(),
            ));
        }

        let work = preprocess::transform(&data.to_owned(), &self.preprocessing)?;
        debug!(
            "transform: {} rows through {} model with {} components",
            work.nrows(),
            self.method.as_str(),
            self.n_components()
        );

        match self.method {
            Method::Svd | Method::Nipals => {
                let loadings = self.loadings.as_ref().ok_or_else(|| {
                    PcaError::NumericalInstability(
                        "linear model is missing its loadings".to_string(),
                    )
                })?;
                Ok(work.dot(loadings))
            }
            Method::Kernel => {
                let kernel_model = self.kernel.as_ref().ok_or_else(|| {
                    PcaError::NumericalInstability(
                        "kernel model is missing its kernel state".to_string(),
                    )
                })?;
                let training = kernel_model
                    .training_data
                    .as_ref()
                    .ok_or(PcaError::MissingTrainingData)?;
                kernel::project(
                    work.view(),
                    training.view(),
                    &kernel_model.kernel,
                    &kernel_model.eigenvalues,
                    &kernel_model.eigenvectors,
                    &kernel_model.col_means,
                    kernel_model.grand_mean,
                )
            }
        }
    }

    /// Maps scores back to the original variable units: reconstructs the
    /// preprocessed matrix through the loadings, then undoes the column-wise
    /// preprocessing. Row-wise normalization (SNV, L2) is not invertible and
    /// stays applied. Kernel models have no loadings to reconstruct through.
    pub fn inverse_transform(&self, scores: ArrayView2<f64>) -> Result<Array2<f64>> {
        let loadings = self
            .loadings
            .as_ref()
            .ok_or(PcaError::UnsupportedForMethod("kernel"))?;
        if scores.ncols() != loadings.ncols() {
            return Err(PcaError::DimensionMismatch {
                expected: loadings.ncols(),
                actual: scores.ncols(),
            });
        }
        let reconstructed = scores.dot(&loadings.t());
        preprocess::inverse_transform(&reconstructed, &self.preprocessing)
    }

    /// Serializes the model as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer(writer, self)?;
        info!("model saved to {:?}", path);
        Ok(())
    }

    /// Deserializes a model from JSON and validates its internal shape
    /// invariants before handing it back.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let model: PcaModel = serde_json::from_reader(reader)?;
        model.validate()?;
        info!(
            "model loaded from {:?}: {} components, {} features",
            path,
            model.n_components(),
            model.n_features
        );
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        let k = self.explained_variance.len();
        if self.scores.ncols() != k
            || self.explained_variance_ratio.len() != k
            || self.cumulative_variance.len() != k
            || self.component_labels.len() != k
        {
            return Err(PcaError::InvalidConfig(
                "model component counts are inconsistent".to_string(),
            ));
        }
        match self.method {
            Method::Svd | Method::Nipals => {
                let loadings = self.loadings.as_ref().ok_or_else(|| {
                    PcaError::InvalidConfig("linear model has no loadings".to_string())
                })?;
                if loadings.dim() != (self.n_features, k) {
                    return Err(PcaError::InvalidConfig(format!(
                        "loadings shape {:?} does not match {} features x {} components",
                        loadings.dim(),
                        self.n_features,
                        k
                    )));
                }
                if loadings.iter().any(|v| !v.is_finite()) {
                    return Err(PcaError::InvalidConfig(
                        "loadings contain non-finite values".to_string(),
                    ));
                }
            }
            Method::Kernel => {
                let kernel_model = self.kernel.as_ref().ok_or_else(|| {
                    PcaError::InvalidConfig("kernel model has no kernel state".to_string())
                })?;
                if kernel_model.eigenvalues.len() != k || kernel_model.eigenvectors.ncols() != k {
                    return Err(PcaError::InvalidConfig(
                        "kernel state component counts are inconsistent".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}
