//! Alternating intrinsics / distortion initialization.
//!
//! Zhang's method assumes a pinhole camera, so on real lenses it returns a
//! biased `K`. Alternating between a linear distortion fit and a Zhang
//! solve on undistorted pixels removes most of that bias in a couple of
//! rounds.

use quadcal_core::{
    distort_to_pixel, undistort_pixel, BrownConrady5, FxFyCxCySkew, NoDistortion, Pt2, Real,
};
use thiserror::Error;

use crate::distortion_fit::{
    estimate_distortion_from_homographies, DistortionFitError, DistortionFitOptions, DistortionView,
};
use crate::homography::{dlt_homography, HomographyError};
use crate::zhang_intrinsics::{estimate_intrinsics_from_homographies, ZhangError};

#[derive(Debug, Error)]
pub enum IterativeIntrinsicsError {
    #[error("need at least 3 views, got {0}")]
    NotEnoughViews(usize),
    #[error(transparent)]
    Homography(#[from] HomographyError),
    #[error(transparent)]
    Zhang(#[from] ZhangError),
    #[error(transparent)]
    Distortion(#[from] DistortionFitError),
}

#[derive(Debug, Clone, Copy)]
pub struct IterativeIntrinsicsOptions {
    /// Alternation rounds after the initial Zhang solve.
    pub iterations: usize,
    pub distortion_opts: DistortionFitOptions,
    /// Force `skew = 0` after every Zhang solve.
    pub zero_skew: bool,
}

impl Default for IterativeIntrinsicsOptions {
    fn default() -> Self {
        Self {
            iterations: 2,
            distortion_opts: DistortionFitOptions::default(),
            zero_skew: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IterativeIntrinsicsResult {
    pub intrinsics: FxFyCxCySkew<Real>,
    pub distortion: BrownConrady5<Real>,
}

fn zhang(hs: &[nalgebra::Matrix3<Real>], zero_skew: bool) -> Result<FxFyCxCySkew<Real>, ZhangError> {
    let mut k = estimate_intrinsics_from_homographies(hs)?;
    if zero_skew {
        k.skew = 0.0;
    }
    Ok(k)
}

/// Estimate `K` and Brown-Conrady coefficients from planar views given as
/// `(board_points, pixel_points)` pairs.
pub fn estimate_intrinsics_iterative(
    views: &[(Vec<Pt2>, Vec<Pt2>)],
    opts: IterativeIntrinsicsOptions,
) -> Result<IterativeIntrinsicsResult, IterativeIntrinsicsError> {
    if views.len() < 3 {
        return Err(IterativeIntrinsicsError::NotEnoughViews(views.len()));
    }

    let raw_hs = views
        .iter()
        .map(|(board, px)| dlt_homography(board, px))
        .collect::<Result<Vec<_>, _>>()?;
    let mut k = zhang(&raw_hs, opts.zero_skew)?;
    let mut dist = BrownConrady5 {
        iters: opts.distortion_opts.iters,
        ..Default::default()
    };

    for _ in 0..opts.iterations {
        let dist_views = views
            .iter()
            .zip(&raw_hs)
            .map(|((board, px), h)| DistortionView::new(*h, board.clone(), px.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        dist = estimate_distortion_from_homographies(&k.k_matrix(), &dist_views, opts.distortion_opts)?;

        let undistorted_hs = views
            .iter()
            .map(|(board, px)| {
                let clean: Vec<Pt2> = px
                    .iter()
                    .map(|p| distort_to_pixel(undistort_pixel(*p, &k, &dist), &k, &NoDistortion))
                    .collect();
                dlt_homography(board, &clean)
            })
            .collect::<Result<Vec<_>, _>>()?;
        k = zhang(&undistorted_hs, opts.zero_skew)?;
    }

    Ok(IterativeIntrinsicsResult {
        intrinsics: k,
        distortion: dist,
    })
}
