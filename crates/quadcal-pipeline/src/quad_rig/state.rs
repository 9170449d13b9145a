//! Intermediate results of a quad-rig calibration run.

use quadcal_core::{CameraIntrinsics, CameraPair, CameraPose, Real, Vec3, NUM_CAMERAS};
use quadcal_imaging::StereoRectification;
use quadcal_optim::RefineReport;
use serde::{Deserialize, Serialize};

use crate::artifacts::ValidationReport;

/// Where the per-camera intrinsics came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntrinsicsSource {
    #[default]
    Standard,
    HighRes,
}

/// Pose of one camera relative to the reference camera:
/// `X_cam = R(rvec) · X_ref + tvec`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairwisePose {
    pub rvec: Vec3,
    pub tvec: Vec3,
    /// Shared frames the pose was solved from.
    pub frames: usize,
    /// RMS reprojection error over both cameras (pixels).
    pub rms: Real,
}

impl PairwisePose {
    /// Camera centre in reference-camera coordinates, `-Rᵀ·T`.
    pub fn position(&self) -> Vec3 {
        let r = quadcal_core::rvec_to_matrix(&self.rvec);
        -(r.transpose() * self.tvec)
    }
}

/// A step skipped part of its work; the run continued with defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// Too few frames to calibrate a camera.
    Intrinsics { camera: usize, frames: usize, required: usize },
    IntrinsicsFailed { camera: usize, error: String },
    /// Camera has no intrinsics, so no pairwise pose.
    PairUncalibrated { camera: usize },
    /// Too few frames shared with the reference camera.
    Pair { camera: usize, frames: usize, required: usize },
    PairFailed { camera: usize, error: String },
    BundleRefine { complete_frames: usize, required: usize },
    Rectification { pair: String, error: String },
    Validation { pair: String, reason: String },
}

/// Distance between two camera centres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraDistance {
    pub pair: CameraPair,
    pub distance_mm: Real,
}

/// Inter-camera spacing diagnostics.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpacingReport {
    pub distances: Vec<CameraDistance>,
    pub mean_spacing_mm: Real,
    /// Mean spacing outside the plausible range.
    pub suspicious: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuadRigState {
    // ─────────────────────────────────────────────────────────────────────────
    // Intrinsics
    // ─────────────────────────────────────────────────────────────────────────
    pub intrinsics: Option<[Option<CameraIntrinsics>; NUM_CAMERAS]>,
    pub intrinsics_source: IntrinsicsSource,

    // ─────────────────────────────────────────────────────────────────────────
    // Extrinsics
    // ─────────────────────────────────────────────────────────────────────────
    /// Per camera relative to the reference; `None` for the reference
    /// itself and for skipped cameras.
    pub pairwise: Option<[Option<PairwisePose>; NUM_CAMERAS]>,
    /// Centroid-frame poses before refinement.
    pub initial_poses: Option<[CameraPose; NUM_CAMERAS]>,
    pub spacing: Option<SpacingReport>,
    /// Current best poses; refined in place.
    pub poses: Option<[CameraPose; NUM_CAMERAS]>,
    pub refine: Option<RefineReport>,

    // ─────────────────────────────────────────────────────────────────────────
    // Rectification and validation
    // ─────────────────────────────────────────────────────────────────────────
    pub rectified_pairs: Vec<CameraPair>,
    /// Rebuilt from poses on demand; too large to persist with the session.
    #[serde(skip)]
    pub rectifications: Vec<(CameraPair, StereoRectification)>,
    pub validation: Option<ValidationReport>,

    /// Every local recovery, in order.
    pub skipped: Vec<SkipReason>,
}

impl QuadRigState {
    pub fn rectification(&self, pair: CameraPair) -> Option<&StereoRectification> {
        self.rectifications
            .iter()
            .find(|(p, _)| *p == pair)
            .map(|(_, r)| r)
    }

    /// Number of cameras with intrinsics.
    pub fn num_calibrated(&self) -> usize {
        self.intrinsics
            .as_ref()
            .map_or(0, |all| all.iter().flatten().count())
    }

    pub(crate) fn skip(&mut self, reason: SkipReason) {
        self.skipped.push(reason);
    }
}
