//! Linear Brown-Conrady estimate from homography residuals.
//!
//! With `K` known, each board point predicts an ideal (undistorted)
//! normalized position through its view homography. The difference to the
//! observed normalized position is linear in `k1, k2, k3, p1, p2`, so the
//! coefficients follow from one least-squares solve. Good enough to seed
//! the non-linear refinement; not a replacement for it.

use nalgebra::{DMatrix, DVector};
use quadcal_core::{from_homogeneous, to_homogeneous, BrownConrady5, Mat3, Pt2, Real, Vec2};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy)]
pub enum DistortionFitError {
    #[error("need at least {needed} points for distortion estimation, got {got}")]
    NotEnoughPoints { needed: usize, got: usize },
    #[error("board/pixel count mismatch: {0} vs {1}")]
    CountMismatch(usize, usize),
    #[error("intrinsics matrix is not invertible")]
    IntrinsicsNotInvertible,
    #[error("degenerate configuration: all points near the principal point")]
    Degenerate,
    #[error("svd failed during distortion estimation")]
    SvdFailed,
}

/// Which coefficients to estimate.
#[derive(Debug, Clone, Copy)]
pub struct DistortionFitOptions {
    /// Keep `p1 = p2 = 0`.
    pub fix_tangential: bool,
    /// Keep `k3 = 0`; the r⁶ term tends to overfit on narrow lenses.
    pub fix_k3: bool,
    /// Undistortion iterations stored on the returned model.
    pub iters: u32,
}

impl Default for DistortionFitOptions {
    fn default() -> Self {
        Self {
            fix_tangential: false,
            fix_k3: true,
            iters: 8,
        }
    }
}

impl DistortionFitOptions {
    fn num_params(&self) -> usize {
        2 + usize::from(!self.fix_k3) + if self.fix_tangential { 0 } else { 2 }
    }
}

/// One view: a homography fitted to the *distorted* pixels plus the
/// correspondences it came from.
#[derive(Debug, Clone)]
pub struct DistortionView {
    pub homography: Mat3,
    pub board_points: Vec<Pt2>,
    pub pixel_points: Vec<Pt2>,
}

impl DistortionView {
    pub fn new(
        homography: Mat3,
        board_points: Vec<Pt2>,
        pixel_points: Vec<Pt2>,
    ) -> Result<Self, DistortionFitError> {
        if board_points.len() != pixel_points.len() {
            return Err(DistortionFitError::CountMismatch(
                board_points.len(),
                pixel_points.len(),
            ));
        }
        Ok(Self {
            homography,
            board_points,
            pixel_points,
        })
    }
}

fn normalize(k_inv: &Mat3, p: &Pt2) -> Vec2 {
    from_homogeneous(&(k_inv * to_homogeneous(p))).coords
}

/// Fit distortion coefficients given intrinsics `kmtx`.
pub fn estimate_distortion_from_homographies(
    kmtx: &Mat3,
    views: &[DistortionView],
    opts: DistortionFitOptions,
) -> Result<BrownConrady5<Real>, DistortionFitError> {
    let n_params = opts.num_params();
    let total: usize = views.iter().map(|v| v.board_points.len()).sum();
    let needed = n_params.div_ceil(2) + 2;
    if total < needed {
        return Err(DistortionFitError::NotEnoughPoints { needed, got: total });
    }

    let k_inv = kmtx
        .try_inverse()
        .ok_or(DistortionFitError::IntrinsicsNotInvertible)?;

    let mut a = DMatrix::<Real>::zeros(2 * total, n_params);
    let mut b = DVector::<Real>::zeros(2 * total);
    let mut max_r2: Real = 0.0;

    let mut row = 0;
    for view in views {
        for (board, pixel) in view.board_points.iter().zip(&view.pixel_points) {
            let ideal_px = from_homogeneous(&(view.homography * to_homogeneous(board)));
            let ideal = normalize(&k_inv, &ideal_px);
            let residual = normalize(&k_inv, pixel) - ideal;

            let (x, y) = (ideal.x, ideal.y);
            let r2 = x * x + y * y;
            max_r2 = max_r2.max(r2);

            let mut col = 0;
            let mut radial = |a: &mut DMatrix<Real>, rn: Real| {
                a[(row, col)] = x * rn;
                a[(row + 1, col)] = y * rn;
                col += 1;
            };
            radial(&mut a, r2);
            radial(&mut a, r2 * r2);
            if !opts.fix_k3 {
                radial(&mut a, r2 * r2 * r2);
            }
            if !opts.fix_tangential {
                a[(row, col)] = 2.0 * x * y;
                a[(row + 1, col)] = r2 + 2.0 * y * y;
                a[(row, col + 1)] = r2 + 2.0 * x * x;
                a[(row + 1, col + 1)] = 2.0 * x * y;
            }

            b[row] = residual.x;
            b[row + 1] = residual.y;
            row += 2;
        }
    }

    if max_r2 < 1e-6 {
        return Err(DistortionFitError::Degenerate);
    }

    let x = a
        .svd(true, true)
        .solve(&b, 1e-12)
        .map_err(|_| DistortionFitError::SvdFailed)?;

    let mut it = x.iter().copied();
    let mut next = || it.next().unwrap_or(0.0);
    let k1 = next();
    let k2 = next();
    let k3 = if opts.fix_k3 { 0.0 } else { next() };
    let (p1, p2) = if opts.fix_tangential {
        (0.0, 0.0)
    } else {
        (next(), next())
    };

    Ok(BrownConrady5 {
        k1,
        k2,
        k3,
        p1,
        p2,
        iters: opts.iters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlt_homography;
    use nalgebra::{Rotation3, Translation3, Vector3};
    use quadcal_core::{synthetic::planar::grid_points, DistortionModel, FxFyCxCySkew, Iso3};

    fn board() -> Vec<Pt2> {
        grid_points(9, 7, 20.0)
            .into_iter()
            .map(|p| Pt2::new(p.x, p.y))
            .collect()
    }

    fn distorted_view(k: &FxFyCxCySkew<Real>, dist: &BrownConrady5<Real>, iso: Iso3) -> DistortionView {
        let board = board();
        let pixels: Vec<Pt2> = board
            .iter()
            .map(|bp| {
                let pc = iso.transform_point(&quadcal_core::Pt3::new(bp.x, bp.y, 0.0));
                let nd = dist.distort(&Vec2::new(pc.x / pc.z, pc.y / pc.z));
                Pt2::new(k.fx * nd.x + k.cx, k.fy * nd.y + k.cy)
            })
            .collect();
        let h = dlt_homography(&board, &pixels).unwrap();
        DistortionView::new(h, board, pixels).unwrap()
    }

    #[test]
    fn recovers_radial_sign_and_magnitude() {
        let k = FxFyCxCySkew {
            fx: 600.0,
            fy: 600.0,
            cx: 320.0,
            cy: 240.0,
            skew: 0.0,
        };
        let gt = BrownConrady5 {
            k1: -0.12,
            k2: 0.0,
            k3: 0.0,
            p1: 0.0,
            p2: 0.0,
            iters: 8,
        };
        let views: Vec<_> = [
            (Vector3::new(0.1, 0.0, 0.0), Vector3::new(-80.0, -60.0, 350.0)),
            (Vector3::new(0.0, 0.2, 0.05), Vector3::new(-90.0, -55.0, 380.0)),
            (Vector3::new(-0.15, -0.1, 0.0), Vector3::new(-75.0, -65.0, 330.0)),
        ]
        .into_iter()
        .map(|(r, t)| {
            let iso = Iso3::from_parts(
                Translation3::from(t),
                Rotation3::new(r).into(),
            );
            distorted_view(&k, &gt, iso)
        })
        .collect();

        let opts = DistortionFitOptions {
            fix_tangential: true,
            ..Default::default()
        };
        let est = estimate_distortion_from_homographies(&k.k_matrix(), &views, opts).unwrap();
        // The homography absorbs part of the radial term, so only expect
        // the right sign and order of magnitude.
        assert!(est.k1 < 0.0, "k1={}", est.k1);
        assert!(est.k1 > -0.3);
        assert_eq!(est.p1, 0.0);
        assert_eq!(est.k3, 0.0);
    }

    #[test]
    fn count_mismatch_is_rejected() {
        let err = DistortionView::new(Mat3::identity(), vec![Pt2::origin()], vec![]).unwrap_err();
        assert!(matches!(err, DistortionFitError::CountMismatch(1, 0)));
    }
}
