//! Mathematical utilities and type definitions.
//!
//! This module provides fundamental types used throughout the library,
//! rotation-vector conversions and coordinate transformations.

use nalgebra::{Isometry3, Matrix3, Matrix4, Point2, Point3, Vector2, Vector3};

pub mod coordinate_utils;
pub mod rotation;

pub use coordinate_utils::{distort_to_pixel, normalized_to_pixel, pixel_to_normalized, undistort_pixel};
pub use rotation::{iso_from_rvec_tvec, iso_to_rvec_tvec, matrix_to_rvec, rvec_to_matrix};

/// Scalar type used throughout the library (currently `f64`).
pub type Real = f64;

/// 2D vector with [`Real`] components.
pub type Vec2 = Vector2<Real>;
/// 3D vector with [`Real`] components.
pub type Vec3 = Vector3<Real>;
/// 2D point with [`Real`] coordinates.
pub type Pt2 = Point2<Real>;
/// 3D point with [`Real`] coordinates.
pub type Pt3 = Point3<Real>;
/// 3×3 matrix with [`Real`] entries.
pub type Mat3 = Matrix3<Real>;
/// 4×4 matrix with [`Real`] entries.
pub type Mat4 = Matrix4<Real>;
/// 3D rigid transform (SE(3)) using [`Real`].
pub type Iso3 = Isometry3<Real>;

/// Convert a 2D point in Euclidean coordinates into homogeneous coordinates.
///
/// Given a point `p = (x, y)`, returns the homogeneous vector `(x, y, 1)`.
pub fn to_homogeneous(p: &Pt2) -> Vec3 {
    Vec3::new(p.x, p.y, 1.0)
}

/// Convert a 3D homogeneous vector back to a 2D point.
///
/// The input is interpreted as `(x, y, w)` and the result is `(x / w, y / w)`.
/// The caller is responsible for ensuring that `w != 0`.
pub fn from_homogeneous(v: &Vec3) -> Pt2 {
    Pt2::new(v.x / v.z, v.y / v.z)
}

/// Convert a row-major nested array into a [`Mat3`].
pub fn mat3_from_rows(rows: &[[Real; 3]; 3]) -> Mat3 {
    Mat3::new(
        rows[0][0], rows[0][1], rows[0][2], //
        rows[1][0], rows[1][1], rows[1][2], //
        rows[2][0], rows[2][1], rows[2][2],
    )
}

/// Convert a [`Mat3`] into a row-major nested array.
pub fn mat3_to_rows(m: &Mat3) -> [[Real; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn homogeneous_roundtrip() {
        let p = Pt2::new(3.0, -2.0);
        let h = to_homogeneous(&p) * 4.0;
        assert_eq!(from_homogeneous(&h), p);
    }

    #[test]
    fn mat3_rows_roundtrip_is_row_major() {
        let rows = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let m = mat3_from_rows(&rows);
        assert_eq!(m[(0, 2)], 3.0);
        assert_eq!(m[(2, 0)], 7.0);
        assert_eq!(mat3_to_rows(&m), rows);
    }
}
