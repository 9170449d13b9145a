//! Synthetic planar target helpers.
//!
//! Build checkerboard corner grids (Z=0), board poses, and project the
//! target into a camera to produce [`crate::CorrespondenceView`] instances.

use crate::{
    models::{DistortionModel, IntrinsicsModel, ProjectionModel},
    Camera, CorrespondenceView, Iso3, Pt2, Pt3, Real,
};
use anyhow::Result;
use nalgebra::{Translation3, UnitQuaternion, Vector3};

/// Inner-corner grid of a checkerboard, `cols * rows` points at Z=0.
///
/// Row-major order (X fastest), matching the corner order a detector
/// reports for an unrotated board.
pub fn grid_points(cols: usize, rows: usize, square_size: Real) -> Vec<Pt3> {
    let mut points = Vec::with_capacity(cols * rows);
    for j in 0..rows {
        for i in 0..cols {
            points.push(Pt3::new(i as Real * square_size, j as Real * square_size, 0.0));
        }
    }
    points
}

/// Centre of a [`grid_points`] grid.
pub fn grid_center(cols: usize, rows: usize, square_size: Real) -> Pt3 {
    Pt3::new(
        cols.saturating_sub(1) as Real * square_size * 0.5,
        rows.saturating_sub(1) as Real * square_size * 0.5,
        0.0,
    )
}

/// Board pose whose centre sits at `center` with rotation `rvec`.
///
/// The returned isometry maps target-frame points into the destination frame.
pub fn board_pose(board_center: &Pt3, rvec: Vector3<Real>, center: Vector3<Real>) -> Iso3 {
    let rotation = UnitQuaternion::from_scaled_axis(rvec);
    let t = center - rotation * board_center.coords;
    Iso3::from_parts(Translation3::from(t), rotation)
}

/// Project a planar target into the camera, requiring every point to be projectable.
///
/// `cam_from_target` must map target-frame points into the camera frame.
pub fn project_view_all<P, D, K>(
    camera: &Camera<Real, P, D, K>,
    cam_from_target: &Iso3,
    target_points: &[Pt3],
) -> Result<CorrespondenceView>
where
    P: ProjectionModel<Real>,
    D: DistortionModel<Real>,
    K: IntrinsicsModel<Real>,
{
    let mut pixels = Vec::with_capacity(target_points.len());
    for (idx, pw) in target_points.iter().enumerate() {
        let pc = cam_from_target.transform_point(pw);
        let Some(uv) = camera.project_point(&pc) else {
            anyhow::bail!("point {idx} not projectable (z={:.6})", pc.z);
        };
        pixels.push(Pt2::from(uv));
    }

    CorrespondenceView::new(target_points.to_vec(), pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{make_pinhole_camera, BrownConrady5, FxFyCxCySkew};

    #[test]
    fn grid_points_order_is_x_fastest() {
        let pts = grid_points(3, 2, 25.0);
        assert_eq!(pts.len(), 6);
        assert_eq!(pts[1], Pt3::new(25.0, 0.0, 0.0));
        assert_eq!(pts[3], Pt3::new(0.0, 25.0, 0.0));
    }

    #[test]
    fn board_pose_centers_board() {
        let c = grid_center(8, 6, 25.0);
        let pose = board_pose(&c, Vector3::new(0.1, -0.2, 0.0), Vector3::new(0.0, 0.0, 500.0));
        let moved = pose.transform_point(&c);
        assert!((moved.coords - Vector3::new(0.0, 0.0, 500.0)).norm() < 1e-9);
    }

    #[test]
    fn project_view_all_produces_matching_correspondences() {
        let cam = make_pinhole_camera(
            FxFyCxCySkew {
                fx: 500.0,
                fy: 500.0,
                cx: 320.0,
                cy: 200.0,
                skew: 0.0,
            },
            BrownConrady5::default(),
        );
        let board = grid_points(8, 6, 25.0);
        let pose = board_pose(&grid_center(8, 6, 25.0), Vector3::zeros(), Vector3::new(0.0, 0.0, 600.0));

        let view = project_view_all(&cam, &pose, &board).unwrap();
        assert_eq!(view.len(), board.len());
    }
}
