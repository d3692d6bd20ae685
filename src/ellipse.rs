//! Confidence-ellipse geometry for 2D score plots.
//!
//! Each group's ellipse comes from the closed-form eigendecomposition of its
//! 2×2 sample covariance, scaled by the chi-square critical value for two
//! degrees of freedom at the requested confidence level.

use std::collections::BTreeMap;

use log::debug;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::config::ConfidenceLevel;
use crate::error::{PcaError, Result};

/// A covariance this small in both axes is treated as singular and the
/// group is skipped rather than drawn as a degenerate sliver.
const SINGULAR_TOLERANCE: f64 = 1e-12;

/// Geometry of one group's confidence ellipse, in score-plot coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EllipseParams {
    pub center_x: f64,
    pub center_y: f64,
    pub semi_major: f64,
    pub semi_minor: f64,
    /// Rotation of the major axis from the x axis, radians.
    pub angle: f64,
    pub confidence: ConfidenceLevel,
}

/// Computes a confidence ellipse per group label over paired score columns.
///
/// Groups with fewer than three points or a singular covariance produce no
/// ellipse and no error; they are simply absent from the result.
pub fn confidence_ellipses(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    labels: &[String],
    level: ConfidenceLevel,
) -> Result<BTreeMap<String, EllipseParams>> {
    if x.len() != y.len() || x.len() != labels.len() {
        return Err(PcaError::DimensionMismatch {
            expected: x.len(),
            actual: if y.len() != x.len() {
                y.len()
            } else {
                labels.len()
            },
        });
    }

    let mut groups: BTreeMap<&str, Vec<(f64, f64)>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        groups.entry(label.as_str()).or_default().push((x[i], y[i]));
    }

    let chi_square = level.chi_square_2df();
    let mut ellipses = BTreeMap::new();
    for (label, points) in groups {
        if let Some(params) = group_ellipse(&points, chi_square, level) {
            ellipses.insert(label.to_string(), params);
        } else {
            debug!("group {:?} skipped: too few points or singular covariance", label);
        }
    }
    Ok(ellipses)
}

fn group_ellipse(
    points: &[(f64, f64)],
    chi_square: f64,
    level: ConfidenceLevel,
) -> Option<EllipseParams> {
    let n = points.len();
    if n < 3 {
        return None;
    }

    let nf = n as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / nf;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / nf;

    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for &(px, py) in points {
        let dx = px - mean_x;
        let dy = py - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    let denom = nf - 1.0;
    sxx /= denom;
    syy /= denom;
    sxy /= denom;

    // Closed-form eigenvalues of the 2x2 covariance.
    let mean = (sxx + syy) / 2.0;
    let disc = (((sxx - syy) / 2.0).powi(2) + sxy * sxy).sqrt();
    let lambda1 = mean + disc;
    let lambda2 = mean - disc;

    if lambda2 <= SINGULAR_TOLERANCE {
        return None;
    }

    let angle = 0.5 * (2.0 * sxy).atan2(sxx - syy);

    Some(EllipseParams {
        center_x: mean_x,
        center_y: mean_y,
        semi_major: (chi_square * lambda1).sqrt(),
        semi_minor: (chi_square * lambda2).sqrt(),
        angle,
        confidence: level,
    })
}
