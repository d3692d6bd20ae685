//! Preprocessing pipeline: row-wise normalization followed by column-wise
//! centering and scaling.
//!
//! Row-wise operations (SNV, L2 normalization) depend only on the row being
//! transformed, so they are re-derived from each new row at transform time
//! and never stored. Column-wise parameters are fitted once and kept in
//! [`PreprocessingParams`] so saved models can transform unseen data.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::ScaleKind;
use crate::error::{PcaError, Result};

/// Columns with a spread below this floor divide by 1.0 instead, so a
/// constant column yields zeros rather than NaN or infinity.
pub(crate) const DEGENERATE_FLOOR: f64 = 1e-8;

/// Fitted column-wise preprocessing parameters, stored with the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessingParams {
    pub mean_center: bool,
    pub scale: ScaleKind,
    pub snv: bool,
    pub l2_norm: bool,
    /// Per-column means of the (row-normalized) training data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub means: Option<Array1<f64>>,
    /// Per-column divisors: standard deviations for [`ScaleKind::Standard`],
    /// interquartile ranges for [`ScaleKind::Robust`]. Always positive;
    /// degenerate columns hold 1.0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_divisors: Option<Array1<f64>>,
    /// Per-column medians, present for [`ScaleKind::Robust`] only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medians: Option<Array1<f64>>,
}

impl PreprocessingParams {
    /// Parameters that apply no transformation at all. Used by fit paths
    /// that handle centering internally, such as kernel PCA.
    pub(crate) fn none() -> Self {
        Self {
            mean_center: false,
            scale: ScaleKind::None,
            snv: false,
            l2_norm: false,
            means: None,
            scale_divisors: None,
            medians: None,
        }
    }

    /// Number of features the parameters were fitted on, when any
    /// column-wise parameter is present.
    pub(crate) fn n_features(&self) -> Option<usize> {
        self.means
            .as_ref()
            .map(Array1::len)
            .or_else(|| self.scale_divisors.as_ref().map(Array1::len))
            .or_else(|| self.medians.as_ref().map(Array1::len))
    }
}

/// Fits column statistics on the row-normalized data and returns the fully
/// preprocessed working matrix together with the reusable parameters.
pub(crate) fn fit_transform(
    mut data: Array2<f64>,
    mean_center: bool,
    scale: ScaleKind,
    snv: bool,
    l2_norm: bool,
) -> (Array2<f64>, PreprocessingParams) {
    apply_row_ops(&mut data, snv, l2_norm);

    let means = data
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(data.ncols()));

    let (scale_divisors, medians) = match scale {
        ScaleKind::None => (None, None),
        ScaleKind::Standard => {
            let divisors = data.map_axis(Axis(0), |col| {
                let sd = col.std(1.0);
                if sd < DEGENERATE_FLOOR {
                    1.0
                } else {
                    sd
                }
            });
            (Some(divisors), None)
        }
        ScaleKind::Robust => {
            let mut meds = Array1::zeros(data.ncols());
            let mut iqrs = Array1::zeros(data.ncols());
            for (j, col) in data.columns().into_iter().enumerate() {
                let mut sorted: Vec<f64> = col.to_vec();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                meds[j] = quantile(&sorted, 0.5);
                let iqr = quantile(&sorted, 0.75) - quantile(&sorted, 0.25);
                iqrs[j] = if iqr < DEGENERATE_FLOOR { 1.0 } else { iqr };
            }
            (Some(iqrs), Some(meds))
        }
    };

    let params = PreprocessingParams {
        mean_center,
        scale,
        snv,
        l2_norm,
        means: Some(means),
        scale_divisors,
        medians,
    };

    apply_column_ops(&mut data, &params);
    (data, params)
}

/// Re-applies fitted preprocessing to new data. Row-wise statistics are
/// derived from the new rows themselves; column-wise parameters come from
/// the fit.
pub(crate) fn transform(data: &Array2<f64>, params: &PreprocessingParams) -> Result<Array2<f64>> {
    if let Some(expected) = params.n_features() {
        if data.ncols() != expected {
            return Err(PcaError::DimensionMismatch {
                expected,
                actual: data.ncols(),
            });
        }
    }
    let mut out = data.to_owned();
    apply_row_ops(&mut out, params.snv, params.l2_norm);
    apply_column_ops(&mut out, params);
    Ok(out)
}

/// Reverses the column-wise operations. Row-wise normalization is not
/// invertible without the per-row statistics of the intermediate state, so
/// only centering and scaling are undone.
pub(crate) fn inverse_transform(
    data: &Array2<f64>,
    params: &PreprocessingParams,
) -> Result<Array2<f64>> {
    if let Some(expected) = params.n_features() {
        if data.ncols() != expected {
            return Err(PcaError::DimensionMismatch {
                expected,
                actual: data.ncols(),
            });
        }
    }
    let mut out = data.to_owned();
    match params.scale {
        ScaleKind::Robust => {
            if let (Some(iqrs), Some(meds)) = (&params.scale_divisors, &params.medians) {
                for mut row in out.rows_mut() {
                    for j in 0..row.len() {
                        row[j] = row[j] * iqrs[j] + meds[j];
                    }
                }
            }
        }
        _ => {
            if let Some(divisors) = &params.scale_divisors {
                out *= divisors;
            }
            if params.mean_center {
                if let Some(means) = &params.means {
                    out += means;
                }
            }
        }
    }
    Ok(out)
}

// SNV takes precedence when both row operations are requested; an
// SNV-scaled row has a fixed norm, so normalizing it again is redundant.
fn apply_row_ops(data: &mut Array2<f64>, snv: bool, l2_norm: bool) {
    if !snv && !l2_norm {
        return;
    }
    for mut row in data.rows_mut() {
        if snv {
            let mean = row.mean().unwrap_or(0.0);
            let sd = row.std(1.0);
            if sd < DEGENERATE_FLOOR {
                // Near-constant row: center without scaling.
                row.mapv_inplace(|v| v - mean);
            } else {
                row.mapv_inplace(|v| (v - mean) / sd);
            }
        } else if l2_norm {
            let norm = row.dot(&row).sqrt();
            if norm > DEGENERATE_FLOOR {
                row.mapv_inplace(|v| v / norm);
            }
        }
    }
}

fn apply_column_ops(data: &mut Array2<f64>, params: &PreprocessingParams) {
    match params.scale {
        ScaleKind::Robust => {
            if let (Some(iqrs), Some(meds)) = (&params.scale_divisors, &params.medians) {
                for mut row in data.rows_mut() {
                    for j in 0..row.len() {
                        row[j] = (row[j] - meds[j]) / iqrs[j];
                    }
                }
            }
        }
        _ => {
            if params.mean_center {
                if let Some(means) = &params.means {
                    *data -= means;
                }
            }
            if let Some(divisors) = &params.scale_divisors {
                *data /= divisors;
            }
        }
    }
}

/// Linearly interpolated quantile of sorted data.
pub(crate) fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let frac = pos - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}
