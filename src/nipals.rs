//! NIPALS decomposition engine.
//!
//! Extracts one component at a time by power iteration and deflation
//! (Wold, 1966). The native-missing variant computes every inner product
//! pairwise-complete, skipping NaN cells, which is the reason to prefer
//! NIPALS over SVD on incomplete data.

use log::{debug, warn};
use ndarray::{Array1, Array2};

use crate::error::{PcaError, Result};
use crate::svd::{fix_component_signs, LinearFit};

pub(crate) const CONVERGENCE_TOLERANCE: f64 = 1e-8;
pub(crate) const MAX_ITERATIONS: usize = 1000;

/// NIPALS on a complete (preprocessed) working matrix.
pub(crate) fn fit(work: Array2<f64>, k: usize) -> Result<LinearFit> {
    let (n_samples, n_features) = work.dim();
    debug!(
        "nipals fit: {} samples x {} features, {} components",
        n_samples, n_features, k
    );

    let mut x = work;
    let mut scores = Array2::zeros((n_samples, k));
    let mut loadings = Array2::zeros((n_features, k));
    let mut converged = true;

    for comp in 0..k {
        let (max_var, init_col) = column_of_max_variance(&x);
        if max_var < CONVERGENCE_TOLERANCE {
            // Remaining variance is exhausted: the matrix cannot support
            // the requested number of components.
            return Err(PcaError::RankDeficient {
                requested: k,
                effective: comp,
            });
        }

        let mut t = x.column(init_col).to_owned();
        let mut p = Array1::zeros(n_features);
        let mut comp_converged = false;

        for _ in 0..MAX_ITERATIONS {
            let t_old = t.clone();

            let t_norm_sq = t.dot(&t);
            if t_norm_sq < CONVERGENCE_TOLERANCE {
                return Err(PcaError::NumericalInstability(format!(
                    "score vector has zero variance at component {}",
                    comp + 1
                )));
            }
            p = x.t().dot(&t).mapv(|v| v / t_norm_sq);

            let p_norm = p.dot(&p).sqrt();
            if p_norm < CONVERGENCE_TOLERANCE {
                return Err(PcaError::NumericalInstability(format!(
                    "loading vector has zero norm at component {}",
                    comp + 1
                )));
            }
            p.mapv_inplace(|v| v / p_norm);

            let p_norm_sq = p.dot(&p);
            t = x.dot(&p).mapv(|v| v / p_norm_sq);

            let diff = &t - &t_old;
            if diff.dot(&diff).sqrt() < CONVERGENCE_TOLERANCE {
                comp_converged = true;
                break;
            }
        }

        if !comp_converged {
            warn!(
                "nipals component {} hit the {}-iteration cap; keeping partial result",
                comp + 1,
                MAX_ITERATIONS
            );
            converged = false;
        }

        scores.column_mut(comp).assign(&t);
        loadings.column_mut(comp).assign(&p);

        // Deflate: X <- X - t p^T
        for i in 0..n_samples {
            for j in 0..n_features {
                x[[i, j]] -= t[i] * p[j];
            }
        }
    }

    fix_component_signs(&mut loadings, &mut scores);

    let denom = (n_samples - 1) as f64;
    let eigenvalues: Vec<f64> = (0..k)
        .map(|j| {
            let col = scores.column(j);
            col.dot(&col) / denom
        })
        .collect();

    // Residual variance left in the deflated matrix, spread over the
    // components that were not extracted, approximates the full spectrum
    // for the ratio denominator.
    let mut all_eigenvalues = eigenvalues.clone();
    if n_features > k {
        let residual_var = x.iter().map(|v| v * v).sum::<f64>() / denom;
        let per_component = residual_var / (n_features - k) as f64;
        all_eigenvalues.extend(std::iter::repeat(per_component).take(n_features - k));
    }

    Ok(LinearFit {
        scores,
        loadings,
        eigenvalues,
        all_eigenvalues,
        converged,
    })
}

/// NIPALS with native missing-value handling: NaN cells are skipped in
/// every inner product rather than imputed. Mean centering, when requested,
/// uses per-column means over observed cells only; those means are returned
/// so the model can center new data at transform time.
pub(crate) fn fit_missing(
    data: Array2<f64>,
    k: usize,
    mean_center: bool,
) -> Result<(LinearFit, Option<Array1<f64>>)> {
    let (n_samples, n_features) = data.dim();
    debug!(
        "nipals fit (native missing): {} samples x {} features, {} components",
        n_samples, n_features, k
    );

    let mut x = data;
    let column_means = if mean_center {
        let means = observed_column_means(&x);
        for mut row in x.rows_mut() {
            for j in 0..n_features {
                if !row[j].is_nan() {
                    row[j] -= means[j];
                }
            }
        }
        Some(means)
    } else {
        None
    };

    let mut scores = Array2::zeros((n_samples, k));
    let mut loadings = Array2::zeros((n_features, k));
    let mut converged = true;

    for comp in 0..k {
        let (max_var, init_col) = observed_column_of_max_variance(&x);
        if max_var < CONVERGENCE_TOLERANCE {
            return Err(PcaError::RankDeficient {
                requested: k,
                effective: comp,
            });
        }

        // Initialize the score vector from the max-variance column, filling
        // missing positions with that column's observed mean.
        let init_mean = {
            let col = x.column(init_col);
            let observed: Vec<f64> = col.iter().copied().filter(|v| !v.is_nan()).collect();
            if observed.is_empty() {
                0.0
            } else {
                observed.iter().sum::<f64>() / observed.len() as f64
            }
        };
        let mut t: Array1<f64> = x
            .column(init_col)
            .iter()
            .map(|&v| if v.is_nan() { init_mean } else { v })
            .collect();

        let mut p = Array1::zeros(n_features);
        let mut comp_converged = false;

        for _ in 0..MAX_ITERATIONS {
            let t_old = t.clone();

            // p_j = sum over observed cells of x_ij t_i / sum t_i^2
            for j in 0..n_features {
                let mut numerator = 0.0;
                let mut denominator = 0.0;
                let mut count = 0usize;
                for i in 0..n_samples {
                    let v = x[[i, j]];
                    if !v.is_nan() {
                        numerator += v * t[i];
                        denominator += t[i] * t[i];
                        count += 1;
                    }
                }
                p[j] = if count > 0 && denominator > CONVERGENCE_TOLERANCE {
                    numerator / denominator
                } else {
                    0.0
                };
            }

            let p_norm = p.dot(&p).sqrt();
            if p_norm < CONVERGENCE_TOLERANCE {
                return Err(PcaError::NumericalInstability(format!(
                    "loading vector has zero norm at component {}",
                    comp + 1
                )));
            }
            p.mapv_inplace(|v| v / p_norm);

            // t_i = sum over observed cells of x_ij p_j / sum p_j^2
            for i in 0..n_samples {
                let mut numerator = 0.0;
                let mut denominator = 0.0;
                let mut count = 0usize;
                for j in 0..n_features {
                    let v = x[[i, j]];
                    if !v.is_nan() {
                        numerator += v * p[j];
                        denominator += p[j] * p[j];
                        count += 1;
                    }
                }
                t[i] = if count > 0 && denominator > CONVERGENCE_TOLERANCE {
                    numerator / denominator
                } else {
                    // Row with no usable cells for this component: keep the
                    // previous iterate.
                    t_old[i]
                };
            }

            let diff = &t - &t_old;
            if diff.dot(&diff).sqrt() < CONVERGENCE_TOLERANCE {
                comp_converged = true;
                break;
            }
        }

        if !comp_converged {
            warn!(
                "nipals component {} hit the {}-iteration cap; keeping partial result",
                comp + 1,
                MAX_ITERATIONS
            );
            converged = false;
        }

        scores.column_mut(comp).assign(&t);
        loadings.column_mut(comp).assign(&p);

        // Deflate observed cells only; NaN cells stay NaN.
        for i in 0..n_samples {
            for j in 0..n_features {
                if !x[[i, j]].is_nan() {
                    x[[i, j]] -= t[i] * p[j];
                }
            }
        }
    }

    fix_component_signs(&mut loadings, &mut scores);

    let denom = (n_samples - 1) as f64;
    let eigenvalues: Vec<f64> = (0..k)
        .map(|j| {
            let col = scores.column(j);
            col.dot(&col) / denom
        })
        .collect();

    // With missing cells the total variance of the data is undefined, so
    // ratios are reported relative to the extracted components only.
    let all_eigenvalues = eigenvalues.clone();

    Ok((
        LinearFit {
            scores,
            loadings,
            eigenvalues,
            all_eigenvalues,
            converged,
        },
        column_means,
    ))
}

fn column_of_max_variance(x: &Array2<f64>) -> (f64, usize) {
    let n = x.nrows() as f64;
    let mut max_var = 0.0;
    let mut max_col = 0;
    for (j, col) in x.columns().into_iter().enumerate() {
        let sum: f64 = col.iter().sum();
        let sum_sq: f64 = col.iter().map(|v| v * v).sum();
        let variance = sum_sq / n - (sum / n) * (sum / n);
        if variance > max_var {
            max_var = variance;
            max_col = j;
        }
    }
    (max_var, max_col)
}

fn observed_column_of_max_variance(x: &Array2<f64>) -> (f64, usize) {
    let mut max_var = 0.0;
    let mut max_col = 0;
    for (j, col) in x.columns().into_iter().enumerate() {
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut count = 0usize;
        for &v in col.iter() {
            if !v.is_nan() {
                sum += v;
                sum_sq += v * v;
                count += 1;
            }
        }
        if count > 0 {
            let mean = sum / count as f64;
            let variance = sum_sq / count as f64 - mean * mean;
            if variance > max_var {
                max_var = variance;
                max_col = j;
            }
        }
    }
    (max_var, max_col)
}

fn observed_column_means(x: &Array2<f64>) -> Array1<f64> {
    let mut means = Array1::zeros(x.ncols());
    for (j, col) in x.columns().into_iter().enumerate() {
        let mut sum = 0.0;
        let mut count = 0usize;
        for &v in col.iter() {
            if !v.is_nan() {
                sum += v;
                count += 1;
            }
        }
        if count > 0 {
            means[j] = sum / count as f64;
        }
    }
    means
}
