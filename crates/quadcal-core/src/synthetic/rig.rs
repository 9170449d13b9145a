//! Ground-truth four-camera rig for end-to-end tests.

use anyhow::{ensure, Result};
use nalgebra::Vector3;

use super::noise::UniformPixelNoise;
use super::planar::{board_pose, grid_center, grid_points, project_view_all};
use crate::{
    BrownConrady5, CalibrationFrame, CameraIntrinsics, CameraPose, CorrespondenceStore,
    FxFyCxCySkew, ImageSize, Iso3, Pt2, Pt3, Real, NUM_CAMERAS,
};

/// A known rig: per-camera intrinsics, centroid-frame poses and a target.
#[derive(Debug, Clone)]
pub struct SyntheticRig {
    pub intrinsics: [CameraIntrinsics; NUM_CAMERAS],
    /// Centroid-frame poses; camera 0 has zero rotation.
    pub poses: [CameraPose; NUM_CAMERAS],
    /// Target inner-corner grid (cols, rows).
    pub pattern: (usize, usize),
    pub square_size: Real,
    /// Distance from the rig to the board centre (mm).
    pub working_distance: Real,
}

impl Default for SyntheticRig {
    /// 2×2 rig with 50 mm spacing, 640x400 cameras and an 8x6 / 25 mm board.
    fn default() -> Self {
        let size = ImageSize::new(640, 400);
        let make = |fx: Real, cx: Real, cy: Real, k1: Real| CameraIntrinsics {
            k: FxFyCxCySkew {
                fx,
                fy: fx * 1.002,
                cx,
                cy,
                skew: 0.0,
            },
            dist: BrownConrady5 {
                k1,
                k2: 0.01,
                k3: 0.0,
                p1: 0.0005,
                p2: -0.0003,
                iters: 12,
            },
            reproj_error: 0.0,
            image_size: size,
        };
        // Layout [[0, 3], [1, 2]]: 0 top-left, 3 top-right, 1 bottom-left, 2 bottom-right.
        let pose = |rx: Real, ry: Real, rz: Real, x: Real, y: Real| CameraPose {
            rvec: Vector3::new(rx, ry, rz),
            tvec: Vector3::new(x, y, 0.0),
        };
        Self {
            intrinsics: [
                make(500.0, 321.0, 199.0, -0.08),
                make(505.0, 318.0, 202.0, -0.07),
                make(498.0, 322.5, 201.0, -0.09),
                make(502.0, 319.0, 198.5, -0.075),
            ],
            poses: [
                pose(0.0, 0.0, 0.0, -25.0, -25.0),
                pose(0.006, -0.004, 0.003, -25.0, 25.0),
                pose(-0.005, 0.007, -0.002, 25.0, 25.0),
                pose(0.004, 0.005, 0.004, 25.0, -25.0),
            ],
            pattern: (8, 6),
            square_size: 25.0,
            working_distance: 600.0,
        }
    }
}

impl SyntheticRig {
    pub fn object_points(&self) -> Vec<Pt3> {
        grid_points(self.pattern.0, self.pattern.1, self.square_size)
    }

    /// Board pose in the rig (centroid) frame for frame `idx`.
    ///
    /// Cycles through tilts and offsets so every camera sees a varied set of
    /// views while the board stays inside all four fields of view.
    pub fn rig_se3_target(&self, idx: usize) -> Iso3 {
        let c = grid_center(self.pattern.0, self.pattern.1, self.square_size);
        let a = idx as Real;
        let tilt_x = 0.35 * ((idx % 5) as Real / 2.0 - 1.0);
        let tilt_y = 0.35 * (((idx / 5) % 4) as Real / 1.5 - 1.0);
        let roll = 0.08 * (a * 0.9).sin();
        let offset = Vector3::new(
            40.0 * (a * 1.3).sin(),
            25.0 * (a * 0.7).cos(),
            self.working_distance + 60.0 * (a * 0.5).sin(),
        );
        board_pose(&c, Vector3::new(tilt_x, tilt_y, roll), offset)
    }

    /// Ground-truth pose of camera `cam` relative to camera 0 as `(R, T)`
    /// with `X_cam = R · X_cam0 + T`.
    pub fn relative_to_reference(&self, cam: usize) -> Iso3 {
        self.poses[cam].cam_se3_rig() * self.poses[0].cam_se3_rig().inverse()
    }

    /// Project the board for frame `idx` into camera `cam`.
    pub fn project(&self, idx: usize, cam: usize, noise: UniformPixelNoise) -> Result<Vec<Pt2>> {
        let cam_from_target = self.poses[cam].cam_se3_rig() * self.rig_se3_target(idx);
        let camera = self.intrinsics[cam].camera();
        let view = project_view_all(&camera, &cam_from_target, &self.object_points())?;
        let size = self.intrinsics[cam].image_size;
        let mut out = Vec::with_capacity(view.len());
        for (pt_idx, p) in view.points_2d.iter().enumerate() {
            ensure!(
                p.x >= 0.0 && p.y >= 0.0 && p.x < size.width as Real && p.y < size.height as Real,
                "frame {idx}: corner {pt_idx} outside camera {cam} image at ({:.1}, {:.1})",
                p.x,
                p.y
            );
            out.push(*p + noise.sample(idx, cam, pt_idx));
        }
        Ok(out)
    }

    /// One frame with every camera's detections.
    pub fn frame(&self, idx: usize, noise: UniformPixelNoise) -> Result<CalibrationFrame> {
        let mut detections: [Option<Vec<Pt2>>; NUM_CAMERAS] = Default::default();
        for (cam, det) in detections.iter_mut().enumerate() {
            *det = Some(self.project(idx, cam, noise)?);
        }
        CalibrationFrame::new(self.object_points(), detections)
    }

    /// `n_frames` frames seen by all four cameras.
    pub fn generate_store(&self, n_frames: usize, noise: UniformPixelNoise) -> Result<CorrespondenceStore> {
        let frames = (0..n_frames)
            .map(|i| self.frame(i, noise))
            .collect::<Result<Vec<_>>>()?;
        CorrespondenceStore::from_frames(frames)
    }
}
