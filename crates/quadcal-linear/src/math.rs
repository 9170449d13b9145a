//! Shared numerical helpers for the linear solvers.

use quadcal_core::{Mat3, Pt2, Real};
use nalgebra::DMatrix;

/// Hartley normalization for 2D points.
///
/// Centers points at the origin and scales so the mean distance from the
/// origin is `√2`. Returns the normalized points and the 3x3 transform `T`
/// with `p_norm = T * p_homogeneous`, or `None` when the input is empty or
/// all points coincide.
pub fn normalize_points_2d(points: &[Pt2]) -> Option<(Vec<Pt2>, Mat3)> {
    if points.is_empty() {
        return None;
    }

    let n = points.len() as Real;
    let cx = points.iter().map(|p| p.x).sum::<Real>() / n;
    let cy = points.iter().map(|p| p.y).sum::<Real>() / n;

    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<Real>()
        / n;
    if mean_dist <= Real::EPSILON {
        return None;
    }

    let scale = (2.0 as Real).sqrt() / mean_dist;
    let t = Mat3::new(
        scale,
        0.0,
        -scale * cx,
        0.0,
        scale,
        -scale * cy,
        0.0,
        0.0,
        1.0,
    );
    let norm = points
        .iter()
        .map(|p| Pt2::new((p.x - cx) * scale, (p.y - cy) * scale))
        .collect();

    Some((norm, t))
}

/// Reshape row `row_idx` of a 9-column `V^T` into a row-major 3x3 matrix.
pub fn mat3_from_svd_row(v_t: &DMatrix<Real>, row_idx: usize) -> Option<Mat3> {
    if v_t.ncols() != 9 || row_idx >= v_t.nrows() {
        return None;
    }
    let mut m = Mat3::zeros();
    for r in 0..3 {
        for c in 0..3 {
            m[(r, c)] = v_t[(row_idx, 3 * r + c)];
        }
    }
    Some(m)
}
