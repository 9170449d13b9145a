use nalgebra::{Rotation3, Translation3, UnitQuaternion};
use quadcal_core::{
    undistort_pixel, CameraIntrinsics, CorrespondenceView, Iso3, Mat3, Pt2, Real, Vec3,
};
use thiserror::Error;

use crate::homography::{dlt_homography, HomographyError};

#[derive(Debug, Error)]
pub enum PlanarPoseError {
    #[error("intrinsics matrix is not invertible")]
    SingularIntrinsics,
    #[error("homography columns are degenerate")]
    Degenerate,
    #[error("svd failed")]
    SvdFailed,
    #[error(transparent)]
    Homography(#[from] HomographyError),
}

/// Estimate the pose of a planar board (Z=0) from `K` and the plane-to-image
/// homography `H`.
///
/// Returns the isometry mapping board coordinates into camera coordinates.
/// The homography scale is chosen so the board lies in front of the camera.
pub fn estimate_planar_pose_from_h(kmtx: &Mat3, hmtx: &Mat3) -> Result<Iso3, PlanarPoseError> {
    let k_inv = kmtx.try_inverse().ok_or(PlanarPoseError::SingularIntrinsics)?;

    let k_inv_h1 = k_inv * hmtx.column(0);
    let k_inv_h2 = k_inv * hmtx.column(1);
    let k_inv_h3 = k_inv * hmtx.column(2);

    let mean_norm = 0.5 * (k_inv_h1.norm() + k_inv_h2.norm());
    if mean_norm <= Real::EPSILON {
        return Err(PlanarPoseError::Degenerate);
    }
    let mut lambda = 1.0 / mean_norm;
    if k_inv_h3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1: Vec3 = k_inv_h1 * lambda;
    let r2: Vec3 = k_inv_h2 * lambda;
    let r3 = r1.cross(&r2);
    let r_approx = Mat3::from_columns(&[r1, r2, r3]);

    // Closest rotation in the Frobenius sense.
    let svd = r_approx.svd(true, true);
    let u = svd.u.ok_or(PlanarPoseError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(PlanarPoseError::SvdFailed)?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r = u_flipped * v_t;
    }

    let t: Vec3 = k_inv_h3 * lambda;
    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    Ok(Iso3::from_parts(Translation3::from(t), rot))
}

/// Initial board pose for one view of a calibrated camera.
///
/// Pixels are undistorted to normalized coordinates first, so the
/// homography is fitted against an ideal pinhole with `K = I`.
pub fn estimate_view_pose(
    intrinsics: &CameraIntrinsics,
    view: &CorrespondenceView,
) -> Result<Iso3, PlanarPoseError> {
    let normalized: Vec<Pt2> = view
        .points_2d
        .iter()
        .map(|p| Pt2::from(undistort_pixel(*p, &intrinsics.k, &intrinsics.dist)))
        .collect();
    let h = dlt_homography(&view.planar_points(), &normalized)?;
    estimate_planar_pose_from_h(&Mat3::identity(), &h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn recovers_pose_even_with_negated_homography() {
        let kmtx = Mat3::new(500.0, 0.0, 320.0, 0.0, 500.0, 200.0, 0.0, 0.0, 1.0);
        let rot = Rotation3::from_euler_angles(0.1, -0.05, 0.2);
        let t = Vector3::new(-80.0, -60.0, 600.0);

        let r = rot.matrix();
        let mut h = Mat3::zeros();
        h.set_column(0, &(kmtx * r.column(0)));
        h.set_column(1, &(kmtx * r.column(1)));
        h.set_column(2, &(kmtx * t));

        for hh in [h, -h * 3.0] {
            let iso = estimate_planar_pose_from_h(&kmtx, &hh).unwrap();
            assert!((iso.translation.vector - t).norm() < 1e-6);
            let r_diff = iso.rotation.to_rotation_matrix().matrix().transpose() * r;
            let angle = ((r_diff.trace() - 1.0) * 0.5).clamp(-1.0, 1.0).acos();
            assert!(angle < 1e-6, "rotation error {angle}");
        }
    }

    #[test]
    fn view_pose_matches_synthetic_rig() {
        use quadcal_core::synthetic::{noise::UniformPixelNoise, rig::SyntheticRig};

        let rig = SyntheticRig::default();
        let frame = rig.frame(3, UniformPixelNoise::none()).unwrap();
        let view = frame.view(2).unwrap();
        let pose = estimate_view_pose(&rig.intrinsics[2], &view).unwrap();

        let gt = rig.poses[2].cam_se3_rig() * rig.rig_se3_target(3);
        assert!((pose.translation.vector - gt.translation.vector).norm() < 1e-3);
        assert!(pose.rotation.angle_to(&gt.rotation) < 1e-5);
    }
}
