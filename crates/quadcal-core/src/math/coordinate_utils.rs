//! Coordinate transformation utilities for camera projection.
//!
//! Conversions between pixel coordinates and normalized camera coordinates,
//! with or without the lens distortion stage.

use crate::{DistortionModel, FxFyCxCySkew, IntrinsicsModel, Pt2, Real, Vec2};

/// Convert pixel coordinates to normalized coordinates (Z=1 plane).
///
/// Applies `K^{-1}` in closed form, so no matrix inversion can fail.
pub fn pixel_to_normalized(pixel: Pt2, k: &FxFyCxCySkew<Real>) -> Vec2 {
    k.pixel_to_sensor(&pixel.coords)
}

/// Convert normalized coordinates (Z=1 plane) to pixel coordinates.
pub fn normalized_to_pixel(normalized: Vec2, k: &FxFyCxCySkew<Real>) -> Pt2 {
    Pt2::from(k.sensor_to_pixel(&normalized))
}

/// Undistort pixel coordinates to normalized coordinates.
///
/// 1. `n = K^{-1} * [u, v, 1]^T`
/// 2. `n_undist = distortion.undistort(n)` (fixed-point iteration)
pub fn undistort_pixel<D: DistortionModel<Real>>(
    pixel: Pt2,
    k: &FxFyCxCySkew<Real>,
    distortion: &D,
) -> Vec2 {
    let normalized = pixel_to_normalized(pixel, k);
    distortion.undistort(&normalized)
}

/// Apply distortion to normalized coordinates and convert to pixels.
///
/// Inverse of [`undistort_pixel`] up to the convergence of the
/// undistortion iteration.
pub fn distort_to_pixel<D: DistortionModel<Real>>(
    normalized: Vec2,
    k: &FxFyCxCySkew<Real>,
    distortion: &D,
) -> Pt2 {
    normalized_to_pixel(distortion.distort(&normalized), k)
}
