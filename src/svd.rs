//! SVD decomposition engine.
//!
//! Factorizes the working matrix as X = U Σ Vᵀ, takes scores = U·Σ and
//! loadings = V for the first k components. Eigenvalues are σ²/(n−1).

use log::debug;
use ndarray::{s, Array2};
use ndarray_linalg::SVDInto;

use crate::error::{PcaError, Result};
use crate::RANK_TOLERANCE;

/// Common output shape of the linear engines (SVD and NIPALS).
pub(crate) struct LinearFit {
    /// n × k score matrix.
    pub scores: Array2<f64>,
    /// p × k loading matrix.
    pub loadings: Array2<f64>,
    /// Eigenvalues of the retained components, descending.
    pub eigenvalues: Vec<f64>,
    /// Eigenvalues of every computed (or estimated) component; the
    /// denominator for explained-variance ratios.
    pub all_eigenvalues: Vec<f64>,
    /// False only when NIPALS hit its iteration cap.
    pub converged: bool,
}

pub(crate) fn fit(work: Array2<f64>, k: usize) -> Result<LinearFit> {
    let n_samples = work.nrows();
    debug!(
        "svd fit: {} samples x {} features, {} components",
        n_samples,
        work.ncols(),
        k
    );

    let (u, sigma, vt) = {
        let (u_opt, sigma, vt_opt) = work
            .svd_into(true, true)
            .map_err(|e| PcaError::NumericalInstability(format!("SVD factorization failed: {}", e)))?;
        let u = u_opt.ok_or_else(|| {
            PcaError::NumericalInstability("SVD did not return left singular vectors".to_string())
        })?;
        let vt = vt_opt.ok_or_else(|| {
            PcaError::NumericalInstability("SVD did not return right singular vectors".to_string())
        })?;
        (u, sigma, vt)
    };

    let effective_rank = sigma.iter().filter(|&&v| v > RANK_TOLERANCE).count();
    if effective_rank < k {
        return Err(PcaError::RankDeficient {
            requested: k,
            effective: effective_rank,
        });
    }

    // Scores = U·Σ for the first k columns.
    let mut scores = u.slice(s![.., ..k]).to_owned();
    for (j, mut col) in scores.columns_mut().into_iter().enumerate() {
        let sv = sigma[j];
        col.mapv_inplace(|v| v * sv);
    }
    let mut loadings = vt.slice(s![..k, ..]).t().to_owned();

    fix_component_signs(&mut loadings, &mut scores);

    let denom = (n_samples - 1) as f64;
    let all_eigenvalues: Vec<f64> = sigma.iter().map(|sv| sv * sv / denom).collect();
    let eigenvalues = all_eigenvalues[..k].to_vec();

    Ok(LinearFit {
        scores,
        loadings,
        eigenvalues,
        all_eigenvalues,
        converged: true,
    })
}

/// Fixes each component's sign so the largest-magnitude loading is positive.
/// SVD signs are otherwise arbitrary, and golden-file regression tests depend
/// on reproducible output.
pub(crate) fn fix_component_signs(loadings: &mut Array2<f64>, scores: &mut Array2<f64>) {
    for j in 0..loadings.ncols() {
        let col = loadings.column(j);
        let mut max_abs = 0.0;
        let mut max_val = 0.0;
        for &v in col.iter() {
            if v.abs() > max_abs {
                max_abs = v.abs();
                max_val = v;
            }
        }
        if max_val < 0.0 {
            loadings.column_mut(j).mapv_inplace(|v| -v);
            scores.column_mut(j).mapv_inplace(|v| -v);
        }
    }
}
