//! Per-camera calibration results and rig layout description.

use serde::{Deserialize, Serialize};

use crate::{make_pinhole_camera, BrownConrady5, FxFyCxCySkew, Iso3, Mat3, PinholeCamera, Real, Vec3};
use crate::math::{iso_from_rvec_tvec, rvec_to_matrix};

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Per-axis scale factors mapping `self` onto `target`.
    pub fn scale_to(&self, target: ImageSize) -> (Real, Real) {
        (
            target.width as Real / self.width as Real,
            target.height as Real / self.height as Real,
        )
    }

    pub fn num_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Calibrated projection model of one camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub k: FxFyCxCySkew<Real>,
    pub dist: BrownConrady5<Real>,
    /// Mean reprojection error of the solve (pixels); diagnostic only.
    pub reproj_error: Real,
    /// Resolution the intrinsics are valid for.
    pub image_size: ImageSize,
}

impl CameraIntrinsics {
    pub fn camera(&self) -> PinholeCamera {
        make_pinhole_camera(self.k, self.dist)
    }

    pub fn k_matrix(&self) -> Mat3 {
        self.k.k_matrix()
    }

    /// Rescale to another resolution.
    ///
    /// Focal lengths and principal point follow the per-axis resolution
    /// ratio; distortion is resolution-invariant and copied unchanged.
    pub fn rescaled_to(&self, target: ImageSize) -> Self {
        let (sx, sy) = self.image_size.scale_to(target);
        Self {
            k: self.k.scaled(sx, sy),
            dist: self.dist,
            reproj_error: self.reproj_error,
            image_size: target,
        }
    }
}

/// Camera pose in the centroid reference frame.
///
/// `rvec` is the camera's rotation (rig axes to camera axes) and `tvec` its
/// position relative to the rig centroid. A rig point `X` lands at
/// `R(rvec) · (X - tvec)` in camera coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub rvec: Vec3,
    pub tvec: Vec3,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self::identity()
    }
}

impl CameraPose {
    pub fn identity() -> Self {
        Self {
            rvec: Vec3::zeros(),
            tvec: Vec3::zeros(),
        }
    }

    pub fn rotation(&self) -> Mat3 {
        rvec_to_matrix(&self.rvec)
    }

    /// Rig-to-camera transform `T_C_R`.
    pub fn cam_se3_rig(&self) -> Iso3 {
        let t = -(self.rotation() * self.tvec);
        iso_from_rvec_tvec(&self.rvec, &t)
    }
}

/// Ordered camera pair used for rectification and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraPair {
    pub first: usize,
    pub second: usize,
}

impl CameraPair {
    pub const fn new(first: usize, second: usize) -> Self {
        Self { first, second }
    }

    /// Short name used in artifact keys, e.g. `"03"`.
    pub fn name(&self) -> String {
        format!("{}{}", self.first, self.second)
    }
}

/// Physical arrangement of the four cameras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigLayout {
    /// Camera every pairwise pose is solved against.
    pub reference_camera: usize,
    /// Camera indices per grid row, e.g. `[[0, 3], [1, 2]]`.
    pub grid: [[usize; 2]; 2],
    /// Pairs that get rectification maps (horizontal and vertical neighbours).
    pub rect_pairs: Vec<CameraPair>,
    /// Plausible average inter-camera spacing in millimetres.
    pub spacing_range_mm: (Real, Real),
}

impl Default for RigLayout {
    fn default() -> Self {
        Self {
            reference_camera: 0,
            grid: [[0, 3], [1, 2]],
            rect_pairs: vec![
                CameraPair::new(0, 3),
                CameraPair::new(1, 2),
                CameraPair::new(0, 1),
                CameraPair::new(3, 2),
            ],
            spacing_range_mm: (20.0, 200.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pt3;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            k: FxFyCxCySkew {
                fx: 1000.0,
                fy: 1004.0,
                cx: 642.0,
                cy: 398.0,
                skew: 0.0,
            },
            dist: BrownConrady5::from_coeffs([-0.1, 0.05, 0.001, -0.002, 0.0]),
            reproj_error: 0.3,
            image_size: ImageSize::new(1280, 800),
        }
    }

    #[test]
    fn rescale_roundtrip_recovers_original() {
        let hi = intrinsics();
        let lo = hi.rescaled_to(ImageSize::new(640, 400));
        assert!((lo.k.fx - 500.0).abs() < 1e-12);
        assert!((lo.k.cy - 199.0).abs() < 1e-12);
        assert_eq!(lo.dist, hi.dist);

        let back = lo.rescaled_to(ImageSize::new(1280, 800));
        assert!((back.k.fx - hi.k.fx).abs() < 1e-9);
        assert!((back.k.fy - hi.k.fy).abs() < 1e-9);
        assert!((back.k.cx - hi.k.cx).abs() < 1e-9);
        assert!((back.k.cy - hi.k.cy).abs() < 1e-9);
    }

    #[test]
    fn cam_se3_rig_maps_position_to_origin() {
        let pose = CameraPose {
            rvec: Vec3::new(0.02, -0.01, 0.03),
            tvec: Vec3::new(25.0, -25.0, 1.0),
        };
        let p = Pt3::from(pose.tvec);
        let in_cam = pose.cam_se3_rig().transform_point(&p);
        assert!(in_cam.coords.norm() < 1e-12);
    }

    #[test]
    fn default_layout_has_no_diagonals() {
        let layout = RigLayout::default();
        let names: Vec<_> = layout.rect_pairs.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["03", "12", "01", "32"]);
        assert!(!names.contains(&"02".to_string()));
        assert!(!names.contains(&"13".to_string()));
    }
}
