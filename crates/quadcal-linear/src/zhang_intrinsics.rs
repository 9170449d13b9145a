//! Zhang's closed-form intrinsics from plane homographies.

use nalgebra::{DMatrix, SVector};
use quadcal_core::{FxFyCxCySkew, Mat3, Real};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZhangError {
    #[error("need at least 3 homographies, got {0}")]
    NotEnoughHomographies(usize),
    #[error("svd failed")]
    SvdFailed,
    #[error("degenerate view configuration (views too similar)")]
    Degenerate,
    #[error("invalid sign for lambda; check homographies")]
    InvalidLambda,
}

/// The 6-vector `v_ij(H)` from Zhang's paper (0-based column indices).
fn v_ij(hmtx: &Mat3, i: usize, j: usize) -> SVector<Real, 6> {
    let hi = hmtx.column(i);
    let hj = hmtx.column(j);

    SVector::<Real, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Estimate K from plane homographies (no distortion).
///
/// Requires at least 3 homographies from distinct board orientations.
pub fn estimate_intrinsics_from_homographies(
    hmtxs: &[Mat3],
) -> Result<FxFyCxCySkew<Real>, ZhangError> {
    if hmtxs.len() < 3 {
        return Err(ZhangError::NotEnoughHomographies(hmtxs.len()));
    }

    let m = hmtxs.len();
    let mut vmtx = DMatrix::<Real>::zeros(2 * m, 6);
    for (k, hmtx) in hmtxs.iter().enumerate() {
        let v11 = v_ij(hmtx, 0, 0);
        let v22 = v_ij(hmtx, 1, 1);
        let v12 = v_ij(hmtx, 0, 1);
        vmtx.row_mut(2 * k).copy_from(&v12.transpose());
        vmtx.row_mut(2 * k + 1).copy_from(&(v11 - v22).transpose());
    }

    let svd = vmtx.svd(false, true);
    let v_t = svd.v_t.ok_or(ZhangError::SvdFailed)?;
    let b = v_t.row(v_t.nrows() - 1);
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    let denom_norm = b11 * b11 + b22 * b22;
    let denom_rel = if denom_norm > 0.0 {
        denom.abs() / denom_norm
    } else {
        0.0
    };
    if denom_rel <= 1e-12 {
        return Err(ZhangError::Degenerate);
    }

    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if lambda.signum() != b11.signum() || lambda * b11 / denom <= 0.0 {
        return Err(ZhangError::InvalidLambda);
    }

    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    Ok(FxFyCxCySkew {
        fx: alpha,
        fy: beta,
        cx: u0,
        cy: v0,
        skew: gamma,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Rotation3, Vector3};

    pub(crate) fn synthetic_homography(kmtx: &Mat3, rot: Rotation3<Real>, t: Vector3<Real>) -> Mat3 {
        let r = rot.matrix();
        let mut h = Mat3::zeros();
        h.set_column(0, &(kmtx * r.column(0)));
        h.set_column(1, &(kmtx * r.column(1)));
        h.set_column(2, &(kmtx * t));
        h
    }

    #[test]
    fn recovers_k_from_three_views() {
        let gt = FxFyCxCySkew {
            fx: 500.0,
            fy: 502.0,
            cx: 320.0,
            cy: 200.0,
            skew: 0.0,
        };
        let k = gt.k_matrix();
        let hs = vec![
            synthetic_homography(&k, Rotation3::from_euler_angles(0.2, 0.0, 0.05), Vector3::new(-80.0, -60.0, 600.0)),
            synthetic_homography(&k, Rotation3::from_euler_angles(-0.1, 0.25, -0.1), Vector3::new(-90.0, -50.0, 650.0)),
            synthetic_homography(&k, Rotation3::from_euler_angles(0.3, -0.2, 0.0), Vector3::new(-70.0, -70.0, 560.0)),
        ];

        let est = estimate_intrinsics_from_homographies(&hs).unwrap();
        assert!((est.fx - gt.fx).abs() < 1e-3, "fx={}", est.fx);
        assert!((est.fy - gt.fy).abs() < 1e-3, "fy={}", est.fy);
        assert!((est.cx - gt.cx).abs() < 1e-3);
        assert!((est.cy - gt.cy).abs() < 1e-3);
        assert!(est.skew.abs() < 1e-6);
    }

    #[test]
    fn rejects_two_views() {
        let h = Mat3::identity();
        assert!(matches!(
            estimate_intrinsics_from_homographies(&[h, h]),
            Err(ZhangError::NotEnoughHomographies(2))
        ));
    }
}
