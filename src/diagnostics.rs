//! Per-sample outlier diagnostics: Hotelling's T², Q residuals (SPE),
//! Mahalanobis distances in score space, and an outlier mask.
//!
//! All metrics are recomputed on demand from the model and the raw data;
//! they are never persisted as authoritative state. Thresholds are empirical
//! percentiles of the observed metric, which stays honest on non-Gaussian
//! data where the parametric F/chi-square limits would mislead.

use log::debug;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_linalg::Inverse;
use serde::{Deserialize, Serialize};

use crate::config::Method;
use crate::error::{PcaError, Result};
use crate::model::PcaModel;
use crate::preprocess::{self, quantile};

/// Guard against division by a collapsed eigenvalue in the T² sum.
const EIGENVALUE_GUARD: f64 = 1e-12;

/// Empirical confidence limits for a diagnostic metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricLimits {
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Per-sample diagnostic metrics with their empirical limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticMetrics {
    pub t2: Array1<f64>,
    pub q_residuals: Array1<f64>,
    /// Mahalanobis distance of each sample in retained score space.
    pub mahalanobis: Array1<f64>,
    /// True where T² exceeds its empirical 99% limit.
    pub outlier_mask: Vec<bool>,
    /// n_features × k matrix of each variable's share of a component,
    /// squared loadings normalized per column.
    pub contributions: Array2<f64>,
    pub t2_limits: MetricLimits,
    pub q_limits: MetricLimits,
}

/// Computes diagnostic metrics for `data` against a fitted linear model.
///
/// The model's stored preprocessing is re-applied so the projection agrees
/// with the fit. Kernel models have no loadings in variable space, so the
/// reconstruction-based Q residual is undefined for them. Mahalanobis
/// distances need a score covariance, so at least two samples are required.
pub fn diagnostics(model: &PcaModel, data: ArrayView2<f64>) -> Result<DiagnosticMetrics> {
    if model.method == Method::Kernel {
        return Err(PcaError::UnsupportedForMethod("kernel"));
    }
    if data.ncols() != model.n_features {
        return Err(PcaError::DimensionMismatch {
            expected: model.n_features,
            actual: data.ncols(),
        });
    }
    if data.iter().any(|v| !v.is_finite()) {
        return Err(PcaError::NumericalInstability(
            "diagnostics input contains non-finite values".to_string(),
        ));
    }

    let loadings = model.loadings.as_ref().ok_or_else(|| {
        PcaError::NumericalInstability("linear model is missing its loadings".to_string())
    })?;

    let work = preprocess::transform(&data.to_owned(), &model.preprocessing)?;
    let scores = work.dot(loadings);
    let n_samples = work.nrows();
    debug!(
        "diagnostics: {} samples, {} components",
        n_samples,
        model.n_components()
    );

    let mut t2 = Array1::zeros(n_samples);
    for (i, row) in scores.rows().into_iter().enumerate() {
        let mut sum = 0.0;
        for (j, &score) in row.iter().enumerate() {
            let lambda = model.explained_variance[j].max(EIGENVALUE_GUARD);
            sum += score * score / lambda;
        }
        t2[i] = sum;
    }

    let mahalanobis = mahalanobis_distances(&scores)?;

    // Q = squared residual norm of the rank-k reconstruction.
    let reconstruction = scores.dot(&loadings.t());
    let mut q_residuals = Array1::zeros(n_samples);
    for i in 0..n_samples {
        let mut sum = 0.0;
        for j in 0..work.ncols() {
            let diff = work[[i, j]] - reconstruction[[i, j]];
            sum += diff * diff;
        }
        q_residuals[i] = sum;
    }

    let t2_limits = empirical_limits(&t2);
    let q_limits = empirical_limits(&q_residuals);
    let outlier_mask = t2.iter().map(|&v| v > t2_limits.p99).collect();
    let contributions = variable_contributions(loadings);

    Ok(DiagnosticMetrics {
        t2,
        q_residuals,
        mahalanobis,
        outlier_mask,
        contributions,
        t2_limits,
        q_limits,
    })
}

/// Distance of each sample from the score-space centroid, whitened by the
/// score covariance. A single retained component reduces to |z|-scores.
fn mahalanobis_distances(scores: &Array2<f64>) -> Result<Array1<f64>> {
    let (n_samples, k) = scores.dim();
    if n_samples < 2 {
        return Err(PcaError::NumericalInstability(
            "Mahalanobis distances need at least two samples".to_string(),
        ));
    }
    let means = scores
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(k));
    let centered = scores - &means;
    let denom = (n_samples - 1) as f64;

    if k == 1 {
        let col = centered.column(0);
        let variance = col.dot(&col) / denom;
        if variance < EIGENVALUE_GUARD {
            return Err(PcaError::NumericalInstability(
                "score variance is zero; Mahalanobis distance is undefined".to_string(),
            ));
        }
        return Ok(col.mapv(|v| (v * v / variance).sqrt()));
    }

    let covariance = centered.t().dot(&centered) / denom;
    let inverse = covariance.inv().map_err(|e| {
        PcaError::NumericalInstability(format!("score covariance is not invertible: {}", e))
    })?;

    let mut distances = Array1::zeros(n_samples);
    for (i, row) in centered.rows().into_iter().enumerate() {
        let whitened = inverse.dot(&row);
        distances[i] = row.dot(&whitened).max(0.0).sqrt();
    }
    Ok(distances)
}

/// Squared loadings normalized per component, so each column sums to one.
fn variable_contributions(loadings: &Array2<f64>) -> Array2<f64> {
    let mut contributions = loadings.mapv(|v| v * v);
    for mut col in contributions.columns_mut() {
        let total = col.sum();
        if total > 0.0 {
            col.mapv_inplace(|v| v / total);
        }
    }
    contributions
}

fn empirical_limits(values: &Array1<f64>) -> MetricLimits {
    let mut sorted: Vec<f64> = values.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    MetricLimits {
        p90: quantile(&sorted, 0.90),
        p95: quantile(&sorted, 0.95),
        p99: quantile(&sorted, 0.99),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Method, PcaConfig};
    use crate::fit;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    fn sample_matrix() -> Array2<f64> {
        array![
            [2.5, 2.4, 0.5],
            [0.5, 0.7, 1.9],
            [2.2, 2.9, 0.1],
            [1.9, 2.2, 0.8],
            [3.1, 3.0, -0.2],
            [2.3, 2.7, 0.4],
            [2.0, 1.6, 1.0],
            [1.0, 1.1, 1.7]
        ]
    }

    fn svd_model() -> PcaModel {
        let config = PcaConfig {
            components: 2,
            ..PcaConfig::default()
        };
        fit(sample_matrix(), &config).unwrap()
    }

    #[test]
    fn metrics_are_non_negative_with_matching_length() {
        let model = svd_model();
        let data = sample_matrix();
        let metrics = diagnostics(&model, data.view()).unwrap();
        assert_eq!(metrics.t2.len(), 8);
        assert_eq!(metrics.q_residuals.len(), 8);
        assert_eq!(metrics.mahalanobis.len(), 8);
        assert_eq!(metrics.outlier_mask.len(), 8);
        assert!(metrics.t2.iter().all(|&v| v >= 0.0));
        assert!(metrics.q_residuals.iter().all(|&v| v >= 0.0));
        assert!(metrics.mahalanobis.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn limits_are_ordered() {
        let model = svd_model();
        let data = sample_matrix();
        let metrics = diagnostics(&model, data.view()).unwrap();
        assert!(metrics.t2_limits.p90 <= metrics.t2_limits.p95);
        assert!(metrics.t2_limits.p95 <= metrics.t2_limits.p99);
        assert!(metrics.q_limits.p90 <= metrics.q_limits.p95);
        assert!(metrics.q_limits.p95 <= metrics.q_limits.p99);
    }

    #[test]
    fn full_rank_reconstruction_has_zero_q() {
        // Retaining every component reproduces the working matrix exactly.
        let config = PcaConfig {
            components: 3,
            ..PcaConfig::default()
        };
        let data = sample_matrix();
        let model = fit(data.clone(), &config).unwrap();
        let metrics = diagnostics(&model, data.view()).unwrap();
        for &q in metrics.q_residuals.iter() {
            assert_abs_diff_eq!(q, 0.0, epsilon = 1e-16);
        }
    }

    #[test]
    fn single_component_mahalanobis_is_absolute_z_score() {
        let config = PcaConfig {
            components: 1,
            ..PcaConfig::default()
        };
        let data = sample_matrix();
        let model = fit(data.clone(), &config).unwrap();
        let metrics = diagnostics(&model, data.view()).unwrap();

        let col = model.scores.column(0);
        let mean = col.mean().unwrap();
        let sd = col.std(1.0);
        for (i, &d) in metrics.mahalanobis.iter().enumerate() {
            assert_abs_diff_eq!(d, ((col[i] - mean) / sd).abs(), epsilon = 1e-10);
        }
    }

    #[test]
    fn contribution_columns_sum_to_one() {
        let model = svd_model();
        let data = sample_matrix();
        let metrics = diagnostics(&model, data.view()).unwrap();
        assert_eq!(metrics.contributions.dim(), (3, 2));
        for col in metrics.contributions.columns() {
            assert_abs_diff_eq!(col.sum(), 1.0, epsilon = 1e-10);
        }
        assert!(metrics.contributions.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn outlier_mask_tracks_the_t2_limit() {
        let model = svd_model();
        let data = sample_matrix();
        let metrics = diagnostics(&model, data.view()).unwrap();
        for (i, &flagged) in metrics.outlier_mask.iter().enumerate() {
            assert_eq!(flagged, metrics.t2[i] > metrics.t2_limits.p99);
        }
    }

    #[test]
    fn kernel_models_are_rejected() {
        let mut model = svd_model();
        model.method = Method::Kernel;
        let data = sample_matrix();
        assert!(matches!(
            diagnostics(&model, data.view()),
            Err(PcaError::UnsupportedForMethod("kernel"))
        ));
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let model = svd_model();
        let data = array![[1.0, 2.0]];
        assert!(matches!(
            diagnostics(&model, data.view()),
            Err(PcaError::DimensionMismatch { .. })
        ));
    }
}
