#![doc = include_str!("../README.md")]

mod config;
mod diagnostics;
mod ellipse;
mod error;
mod kernel;
mod missing;
mod model;
mod nipals;
mod preprocess;
mod svd;

pub use config::{
    ConfidenceLevel, KernelKind, Method, MissingStrategy, PcaConfig, ScaleKind,
};
pub use diagnostics::{diagnostics, DiagnosticMetrics, MetricLimits};
pub use ellipse::{confidence_ellipses, EllipseParams};
pub use error::{PcaError, Result};
pub use model::{KernelModel, PcaModel};
pub use preprocess::PreprocessingParams;

use log::{info, warn};
use ndarray::Array2;

use config::Method as M;
use svd::LinearFit;

/// Singular values and eigenvalues below this are treated as zero when
/// counting the effective rank of the working matrix.
pub(crate) const RANK_TOLERANCE: f64 = 1e-8;

/// Fits a PCA model to `data` according to `config`.
///
/// The input matrix is consumed; the core allocates its own working copies
/// and never hands mutated input back to the caller. NaN cells are resolved
/// by the configured [`MissingStrategy`]; any other non-finite value is an
/// error.
pub fn fit(data: Array2<f64>, config: &PcaConfig) -> Result<PcaModel> {
    if data.iter().any(|v| v.is_infinite()) {
        return Err(PcaError::NumericalInstability(
            "input contains infinite values".to_string(),
        ));
    }
    config.validate(data.nrows(), data.ncols())?;
    let n_features = data.ncols();

    info!(
        "fit: {} samples x {} features, method {}, {} components",
        data.nrows(),
        n_features,
        config.method.as_str(),
        config.components
    );

    // NIPALS with the native strategy works on the raw NaN pattern; every
    // other path resolves missing values up front.
    if config.method == M::Nipals
        && config.missing == MissingStrategy::Native
        && missing::has_missing(&data)
    {
        return fit_nipals_native(data, config);
    }

    let data = missing::resolve(data, config.missing)?;
    // Dropping rows can invalidate the component count.
    config.validate(data.nrows(), data.ncols())?;

    match config.method {
        M::Svd | M::Nipals => fit_linear(data, config, n_features),
        M::Kernel => fit_kernel(data, config, n_features),
    }
}

fn fit_linear(data: Array2<f64>, config: &PcaConfig, n_features: usize) -> Result<PcaModel> {
    let (work, params) = preprocess::fit_transform(
        data,
        config.mean_center,
        config.scale,
        config.snv,
        config.l2_norm,
    );

    let fit = match config.method {
        M::Svd => svd::fit(work, config.components)?,
        M::Nipals => nipals::fit(work, config.components)?,
        M::Kernel => unreachable!("kernel dispatch handled by caller"),
    };

    Ok(assemble_linear_model(config.method, fit, params, n_features))
}

fn fit_nipals_native(data: Array2<f64>, config: &PcaConfig) -> Result<PcaModel> {
    let n_features = data.ncols();
    if config.scale != ScaleKind::None || config.snv || config.l2_norm {
        warn!("scaling and row normalization are ignored with native missing-value handling");
    }

    let (fit, column_means) = nipals::fit_missing(data, config.components, config.mean_center)?;

    // Store the observed-cell means so transform centers new data the same
    // way the fit did.
    let mut params = PreprocessingParams::none();
    if let Some(means) = column_means {
        params.mean_center = true;
        params.means = Some(means);
    }

    Ok(assemble_linear_model(M::Nipals, fit, params, n_features))
}

fn assemble_linear_model(
    method: Method,
    fit: LinearFit,
    params: PreprocessingParams,
    n_features: usize,
) -> PcaModel {
    let (ratios, cumulative) = variance_ratios(&fit.eigenvalues, &fit.all_eigenvalues);
    if !fit.converged {
        warn!("model did not fully converge; scores are a capped-iteration approximation");
    }
    PcaModel {
        method,
        scores: fit.scores,
        loadings: Some(fit.loadings),
        explained_variance: fit.eigenvalues,
        explained_variance_ratio: ratios.clone(),
        cumulative_variance: cumulative,
        component_labels: component_labels(ratios.len()),
        preprocessing: params,
        converged: fit.converged,
        n_features,
        kernel: None,
    }
}

fn fit_kernel(data: Array2<f64>, config: &PcaConfig, n_features: usize) -> Result<PcaModel> {
    let kernel_kind = config
        .kernel
        .ok_or_else(|| PcaError::InvalidConfig("kernel method requires kernel parameters".to_string()))?;

    // Feature-space centering happens on the Gram matrix; column-wise
    // centering and robust scaling of the input are not meaningful here.
    if config.mean_center {
        warn!("mean centering is handled in feature space for kernel PCA; column centering skipped");
    }
    let scale = if config.scale == ScaleKind::Robust {
        warn!("robust scaling is not supported with kernel PCA; scaling skipped");
        ScaleKind::None
    } else {
        config.scale
    };

    let (work, params) =
        preprocess::fit_transform(data, false, scale, config.snv, config.l2_norm);

    let fit = kernel::fit(&work, config.components, &kernel_kind)?;
    let (ratios, cumulative) = variance_ratios(&fit.eigenvalues, &fit.all_eigenvalues);

    let training_data = if config.retain_training_data {
        Some(work)
    } else {
        None
    };

    Ok(PcaModel {
        method: M::Kernel,
        scores: fit.scores,
        loadings: None,
        explained_variance: fit.eigenvalues.clone(),
        explained_variance_ratio: ratios.clone(),
        cumulative_variance: cumulative,
        component_labels: component_labels(ratios.len()),
        preprocessing: params,
        converged: true,
        n_features,
        kernel: Some(KernelModel {
            kernel: kernel_kind,
            eigenvalues: fit.eigenvalues,
            eigenvectors: fit.eigenvectors,
            col_means: fit.kernel_col_means,
            grand_mean: fit.kernel_grand_mean,
            training_data,
        }),
    })
}

fn variance_ratios(retained: &[f64], all: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let total: f64 = all.iter().sum();
    let ratios: Vec<f64> = if total > 0.0 {
        retained.iter().map(|v| v / total).collect()
    } else {
        vec![0.0; retained.len()]
    };
    let mut cumulative = Vec::with_capacity(ratios.len());
    let mut running = 0.0;
    for r in &ratios {
        running += r;
        cumulative.push(running);
    }
    (ratios, cumulative)
}

fn component_labels(k: usize) -> Vec<String> {
    (1..=k).map(|i| format!("PC{}", i)).collect()
}
