//! Rotation-vector (axis-angle) helpers.
//!
//! Poses are persisted as a rotation vector `rvec` (axis scaled by angle in
//! radians) plus a translation, matching the Rodrigues convention used by
//! most calibration tooling.

use nalgebra::{Rotation3, Translation3, UnitQuaternion};

use super::{Iso3, Mat3, Vec3};

/// Convert a rotation vector into a rotation matrix.
pub fn rvec_to_matrix(rvec: &Vec3) -> Mat3 {
    Rotation3::from_scaled_axis(*rvec).into_inner()
}

/// Convert a rotation matrix into a rotation vector.
///
/// The input is projected onto SO(3) first, so slightly non-orthonormal
/// matrices (e.g. from a linear solve) are accepted.
pub fn matrix_to_rvec(r: &Mat3) -> Vec3 {
    Rotation3::from_matrix(r).scaled_axis()
}

/// Build an isometry from a rotation vector and a translation.
pub fn iso_from_rvec_tvec(rvec: &Vec3, tvec: &Vec3) -> Iso3 {
    Iso3::from_parts(
        Translation3::from(*tvec),
        UnitQuaternion::from_scaled_axis(*rvec),
    )
}

/// Split an isometry into a rotation vector and a translation.
pub fn iso_to_rvec_tvec(iso: &Iso3) -> (Vec3, Vec3) {
    (iso.rotation.scaled_axis(), iso.translation.vector)
}
