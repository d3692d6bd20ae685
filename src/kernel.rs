//! Kernel PCA engine.
//!
//! Builds the Gram matrix of the (preprocessed) training rows, double-centers
//! it in feature space, and eigendecomposes it. Scores are √λ·α so that
//! projecting the training rows through [`project`] reproduces the fit scores.

use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::{Eigh, UPLO};

use crate::config::KernelKind;
use crate::error::{PcaError, Result};
use crate::RANK_TOLERANCE;

/// Floor applied to retained eigenvalues before taking square roots.
const EIGENVALUE_FLOOR: f64 = 1e-10;

pub(crate) struct KernelFit {
    /// n × k score matrix (√λ·α).
    pub scores: Array2<f64>,
    /// Retained eigenvalues of the centered Gram matrix, descending.
    pub eigenvalues: Vec<f64>,
    /// Every positive eigenvalue; the ratio denominator.
    pub all_eigenvalues: Vec<f64>,
    /// n × k matrix of unit eigenvectors (α), column per component.
    pub eigenvectors: Array2<f64>,
    /// Column means of the uncentered training Gram matrix.
    pub kernel_col_means: Array1<f64>,
    /// Grand mean of the uncentered training Gram matrix.
    pub kernel_grand_mean: f64,
}

pub(crate) fn fit(work: &Array2<f64>, k: usize, kernel: &KernelKind) -> Result<KernelFit> {
    let n_samples = work.nrows();
    let n_features = work.ncols();
    debug!(
        "kernel fit: {} samples x {} features, {} components, kernel {:?}",
        n_samples, n_features, k, kernel
    );

    // Gram matrix of the training rows. Symmetric, so only the upper
    // triangle is computed.
    let mut gram = Array2::zeros((n_samples, n_samples));
    for i in 0..n_samples {
        for j in i..n_samples {
            let v = kernel_value(kernel, work.row(i), work.row(j), n_features);
            gram[[i, j]] = v;
            gram[[j, i]] = v;
        }
    }

    let col_means = gram
        .columns()
        .into_iter()
        .map(|c| c.sum() / n_samples as f64)
        .collect::<Array1<f64>>();
    let grand_mean = col_means.sum() / n_samples as f64;

    // Double centering: Kc_ij = K_ij - rowmean_i - colmean_j + grandmean.
    // The Gram matrix is symmetric, so row means equal column means.
    let mut centered = gram;
    for i in 0..n_samples {
        for j in 0..n_samples {
            centered[[i, j]] -= col_means[i] + col_means[j] - grand_mean;
        }
    }

    let (raw_eigenvalues, raw_eigenvectors) = centered
        .eigh(UPLO::Upper)
        .map_err(|e| PcaError::NumericalInstability(format!("eigendecomposition failed: {}", e)))?;

    // eigh returns ascending order; walk from the back for descending.
    let order: Vec<usize> = (0..n_samples).rev().collect();

    let effective_rank = raw_eigenvalues
        .iter()
        .filter(|&&v| v > RANK_TOLERANCE)
        .count();
    if effective_rank < k {
        return Err(PcaError::RankDeficient {
            requested: k,
            effective: effective_rank,
        });
    }

    let all_eigenvalues: Vec<f64> = order
        .iter()
        .map(|&idx| raw_eigenvalues[idx])
        .filter(|&v| v > 0.0)
        .collect();

    let mut eigenvalues = Vec::with_capacity(k);
    let mut eigenvectors = Array2::zeros((n_samples, k));
    let mut scores = Array2::zeros((n_samples, k));
    for (comp, &idx) in order.iter().take(k).enumerate() {
        let lambda = raw_eigenvalues[idx].max(EIGENVALUE_FLOOR);
        let alpha = raw_eigenvectors.column(idx);
        let sqrt_lambda = lambda.sqrt();
        for i in 0..n_samples {
            eigenvectors[[i, comp]] = alpha[i];
            scores[[i, comp]] = sqrt_lambda * alpha[i];
        }
        eigenvalues.push(lambda);
    }

    Ok(KernelFit {
        scores,
        eigenvalues,
        all_eigenvalues,
        eigenvectors,
        kernel_col_means: col_means,
        kernel_grand_mean: grand_mean,
    })
}

/// Projects new (preprocessed) rows onto the fitted kernel components.
pub(crate) fn project(
    rows: ArrayView2<f64>,
    training: ArrayView2<f64>,
    kernel: &KernelKind,
    eigenvalues: &[f64],
    eigenvectors: &Array2<f64>,
    col_means: &Array1<f64>,
    grand_mean: f64,
) -> Result<Array2<f64>> {
    let n_train = training.nrows();
    let n_features = training.ncols();
    let k = eigenvalues.len();
    let mut scores = Array2::zeros((rows.nrows(), k));

    for (out_idx, row) in rows.rows().into_iter().enumerate() {
        let mut kvec = Array1::zeros(n_train);
        for (i, train_row) in training.rows().into_iter().enumerate() {
            kvec[i] = kernel_value(kernel, row, train_row, n_features);
        }
        let row_mean = kvec.sum() / n_train as f64;
        for i in 0..n_train {
            kvec[i] -= row_mean + col_means[i] - grand_mean;
        }

        for comp in 0..k {
            let lambda = eigenvalues[comp].max(EIGENVALUE_FLOOR);
            let projection = kvec.dot(&eigenvectors.column(comp)) / lambda.sqrt();
            scores[[out_idx, comp]] = projection;
        }
    }

    Ok(scores)
}

pub(crate) fn kernel_value(
    kernel: &KernelKind,
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    n_features: usize,
) -> f64 {
    match kernel {
        KernelKind::Linear => x.dot(&y),
        KernelKind::Rbf { gamma } => {
            let g = effective_gamma(*gamma, n_features);
            let diff = &x - &y;
            (-g * diff.dot(&diff)).exp()
        }
        KernelKind::Poly {
            gamma,
            degree,
            coef0,
        } => {
            let g = effective_gamma(*gamma, n_features);
            (g * x.dot(&y) + coef0).powi(*degree as i32)
        }
    }
}

// gamma = 0 means "use the 1/n_features default".
fn effective_gamma(gamma: f64, n_features: usize) -> f64 {
    if gamma > 0.0 {
        gamma
    } else {
        1.0 / n_features.max(1) as f64
    }
}
