//! Missing-value handling applied before decomposition.
//!
//! NaN cells mark missingness. Every strategy except
//! [`MissingStrategy::Native`] resolves them up front so the engines see a
//! complete matrix; `Native` leaves them for NIPALS to skip cell-by-cell.

use ndarray::{Array2, Axis};

use crate::config::MissingStrategy;
use crate::error::{PcaError, Result};
use crate::preprocess::quantile;

pub(crate) fn has_missing(data: &Array2<f64>) -> bool {
    data.iter().any(|v| v.is_nan())
}

/// Resolves NaN cells according to the strategy, returning a complete
/// matrix. `Native` passes the data through untouched.
pub(crate) fn resolve(data: Array2<f64>, strategy: MissingStrategy) -> Result<Array2<f64>> {
    if strategy == MissingStrategy::Native || !has_missing(&data) {
        return Ok(data);
    }
    match strategy {
        MissingStrategy::Error => {
            let (i, j) = first_missing(&data);
            Err(PcaError::InvalidConfig(format!(
                "missing value at row {}, column {}; select a missing-value strategy",
                i, j
            )))
        }
        MissingStrategy::DropRows => drop_rows(data),
        MissingStrategy::MeanImpute => impute(data, false),
        MissingStrategy::MedianImpute => impute(data, true),
        MissingStrategy::Native => unreachable!(),
    }
}

fn first_missing(data: &Array2<f64>) -> (usize, usize) {
    for (i, row) in data.rows().into_iter().enumerate() {
        for (j, v) in row.iter().enumerate() {
            if v.is_nan() {
                return (i, j);
            }
        }
    }
    (0, 0)
}

fn drop_rows(data: Array2<f64>) -> Result<Array2<f64>> {
    let keep: Vec<usize> = data
        .rows()
        .into_iter()
        .enumerate()
        .filter(|(_, row)| !row.iter().any(|v| v.is_nan()))
        .map(|(i, _)| i)
        .collect();
    if keep.is_empty() {
        return Err(PcaError::InvalidConfig(
            "every row contains missing values".to_string(),
        ));
    }
    Ok(data.select(Axis(0), &keep))
}

fn impute(mut data: Array2<f64>, use_median: bool) -> Result<Array2<f64>> {
    let n_cols = data.ncols();
    let mut fill = vec![0.0; n_cols];
    for j in 0..n_cols {
        let observed: Vec<f64> = data.column(j).iter().copied().filter(|v| !v.is_nan()).collect();
        if observed.is_empty() {
            return Err(PcaError::InvalidConfig(format!(
                "column {} contains only missing values",
                j
            )));
        }
        fill[j] = if use_median {
            let mut sorted = observed;
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            quantile(&sorted, 0.5)
        } else {
            observed.iter().sum::<f64>() / observed.len() as f64
        };
    }
    for mut row in data.rows_mut() {
        for j in 0..n_cols {
            if row[j].is_nan() {
                row[j] = fill[j];
            }
        }
    }
    Ok(data)
}
