//! Packing of calibration quantities into flat parameter vectors.

use quadcal_core::{
    iso_from_rvec_tvec, iso_to_rvec_tvec, BrownConrady5, FxFyCxCySkew, Iso3, Real, Vec3,
};

/// Number of scalars describing one SE(3) pose (`rvec`, `t`).
pub const POSE_DIM: usize = 6;
/// `fx, fy, cx, cy, k1, k2, p1, p2, k3`.
pub const INTRINSICS_DIM: usize = 9;

pub fn pose_to_params(iso: &Iso3) -> [Real; POSE_DIM] {
    let (r, t) = iso_to_rvec_tvec(iso);
    [r.x, r.y, r.z, t.x, t.y, t.z]
}

pub fn pose_from_params(p: &[Real]) -> Iso3 {
    iso_from_rvec_tvec(&Vec3::new(p[0], p[1], p[2]), &Vec3::new(p[3], p[4], p[5]))
}

/// Intrinsics in OpenCV coefficient order, skew excluded.
pub fn intrinsics_to_params(k: &FxFyCxCySkew<Real>, d: &BrownConrady5<Real>) -> [Real; INTRINSICS_DIM] {
    let c = d.to_coeffs();
    [k.fx, k.fy, k.cx, k.cy, c[0], c[1], c[2], c[3], c[4]]
}

pub fn intrinsics_from_params(
    p: &[Real; INTRINSICS_DIM],
    iters: u32,
) -> (FxFyCxCySkew<Real>, BrownConrady5<Real>) {
    let k = FxFyCxCySkew {
        fx: p[0],
        fy: p[1],
        cx: p[2],
        cy: p[3],
        skew: 0.0,
    };
    let mut d = BrownConrady5::from_coeffs([p[4], p[5], p[6], p[7], p[8]]);
    d.iters = iters;
    (k, d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Translation3, UnitQuaternion};

    #[test]
    fn pose_params_roundtrip() {
        let iso = Iso3::from_parts(
            Translation3::new(10.0, -4.0, 600.0),
            UnitQuaternion::from_euler_angles(0.2, -0.1, 0.4),
        );
        let back = pose_from_params(&pose_to_params(&iso));
        assert!((back.translation.vector - iso.translation.vector).norm() < 1e-12);
        assert!(back.rotation.angle_to(&iso.rotation) < 1e-12);
    }

    #[test]
    fn intrinsics_keep_opencv_order() {
        let k = FxFyCxCySkew {
            fx: 500.0,
            fy: 501.0,
            cx: 320.0,
            cy: 200.0,
            skew: 0.0,
        };
        let d = BrownConrady5::from_coeffs([-0.1, 0.02, 0.001, -0.002, 0.003]);
        let p = intrinsics_to_params(&k, &d);
        assert_eq!(p[6], 0.001);
        assert_eq!(p[8], 0.003);
        let (k2, d2) = intrinsics_from_params(&p, 8);
        assert_eq!(k2, k);
        assert_eq!(d2.to_coeffs(), d.to_coeffs());
    }
}
