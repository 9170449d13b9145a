//! [`ProblemType`] implementation for the four-camera rig.

use std::path::PathBuf;

use anyhow::{ensure, Result};
use quadcal_core::{CameraIntrinsics, CameraPose, CorrespondenceStore, ImageSize, RigLayout, NUM_CAMERAS};
use quadcal_imaging::{BrightnessCompensation, DetectorConfig, TargetConfig, ValidationConfig};
use quadcal_optim::{PlanarIntrinsicsOptions, RefineConfig, RefineReport, StereoOptions};
use serde::{Deserialize, Serialize};

use crate::artifacts::{CalibrationSummary, ValidationReport};
use crate::capture::{CaptureConfig, CaptureError};
use crate::highres::HighResConfig;
use crate::session::{current_timestamp, InvalidationPolicy, ProblemType};

use super::state::QuadRigState;

// ─────────────────────────────────────────────────────────────────────────────
// Input
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a calibration run consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuadRigInput {
    pub store: CorrespondenceStore,
    /// Resolution of a single camera view.
    pub camera_size: ImageSize,
    /// Raw per-camera images of a held-out frame for validation.
    #[serde(default)]
    pub validation_frames: Option<[PathBuf; NUM_CAMERAS]>,
    /// High-resolution intrinsics already rescaled to `camera_size`.
    #[serde(default)]
    pub highres_intrinsics: Option<[CameraIntrinsics; NUM_CAMERAS]>,
}

impl QuadRigInput {
    pub fn new(store: CorrespondenceStore, camera_size: ImageSize) -> Self {
        Self {
            store,
            camera_size,
            validation_frames: None,
            highres_intrinsics: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadRigConfig {
    pub target: TargetConfig,
    pub detector: DetectorConfig,
    pub brightness: BrightnessCompensation,
    pub capture: CaptureConfig,
    pub highres: HighResConfig,
    pub solver: SolverConfig,
    pub refine: RefineConfig,
    pub layout: RigLayout,
    pub validation: ValidationConfig,
    pub overlay: OverlayConfig,
}

/// Minimum data per solve step and the solvers' own options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Frames a camera must have seen the target in.
    pub min_intrinsic_frames: usize,
    /// Frames both cameras of a pair must share.
    pub min_pair_frames: usize,
    /// Frames seen by all four cameras before bundle refinement runs.
    pub min_refine_frames: usize,
    pub intrinsics: PlanarIntrinsicsOptions,
    pub stereo: StereoOptions,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            min_intrinsic_frames: 10,
            min_pair_frames: 10,
            min_refine_frames: 10,
            intrinsics: PlanarIntrinsicsOptions::default(),
            stereo: StereoOptions::default(),
        }
    }
}

/// Verification image rendering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub enabled: bool,
    /// Tint strength of the per-camera colour.
    pub alpha: f32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alpha: 0.6,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

/// Final result of one calibration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuadRigOutput {
    pub timestamp: u64,
    pub frames_captured: usize,
    pub use_highres_intrinsics: bool,
    /// `None` for cameras that could not be calibrated.
    pub intrinsics: [Option<CameraIntrinsics>; NUM_CAMERAS],
    /// Centroid-frame poses; identity-rotation defaults for skipped cameras.
    pub poses: [CameraPose; NUM_CAMERAS],
    pub refine: Option<RefineReport>,
    pub validation: Option<ValidationReport>,
}

impl QuadRigOutput {
    /// True when validation ran and every pair passed.
    pub fn quality_certified(&self) -> bool {
        self.validation.as_ref().is_some_and(ValidationReport::is_good)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ProblemType Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Four-camera 2×2 rig calibration.
///
/// Steps, in order: per-camera intrinsics, pairwise poses against the
/// reference camera, re-centering on the camera centroid, bundle
/// refinement, rectification of neighbouring pairs, validation.
///
/// ```no_run
/// use quadcal_pipeline::session::CalibrationSession;
/// use quadcal_pipeline::quad_rig::*;
/// # fn main() -> anyhow::Result<()> {
/// # let input: QuadRigInput = unimplemented!();
/// let mut session = CalibrationSession::<QuadRigProblem>::new();
/// session.set_input(input)?;
/// step_intrinsics(&mut session, None)?;
/// step_pairwise_poses(&mut session, None)?;
/// step_reference_frame(&mut session)?;
/// step_bundle_refine(&mut session, None)?;
/// step_rectification(&mut session)?;
/// step_validate(&mut session, None)?;
/// step_finalize(&mut session)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct QuadRigProblem;

impl ProblemType for QuadRigProblem {
    type Config = QuadRigConfig;
    type Input = QuadRigInput;
    type State = QuadRigState;
    type Output = QuadRigOutput;
    type Export = CalibrationSummary;

    fn name() -> &'static str {
        "quad_rig"
    }

    fn validate_input(input: &Self::Input) -> Result<()> {
        ensure!(!input.store.is_empty(), "correspondence store is empty");
        ensure!(
            input.camera_size.width > 0 && input.camera_size.height > 0,
            "camera size {} is empty",
            input.camera_size
        );
        Ok(())
    }

    fn validate_config(config: &Self::Config) -> Result<()> {
        let layout = &config.layout;
        ensure!(
            layout.reference_camera < NUM_CAMERAS,
            "reference camera {} out of range",
            layout.reference_camera
        );
        for pair in &layout.rect_pairs {
            ensure!(
                pair.first < NUM_CAMERAS && pair.second < NUM_CAMERAS && pair.first != pair.second,
                "invalid rectification pair {}",
                pair.name()
            );
        }
        ensure!(
            (1..=NUM_CAMERAS).contains(&config.capture.quorum),
            "quorum must be between 1 and {NUM_CAMERAS}"
        );
        ensure!(
            config.capture.working_resolution.width % NUM_CAMERAS as u32 == 0,
            "working resolution {} does not split into {NUM_CAMERAS} views",
            config.capture.working_resolution
        );
        ensure!(config.solver.min_intrinsic_frames >= 3, "min_intrinsic_frames must be at least 3");
        ensure!(config.solver.min_pair_frames >= 1, "min_pair_frames must be positive");
        Ok(())
    }

    fn validate_input_config(input: &Self::Input, config: &Self::Config) -> Result<()> {
        if input.store.len() < config.capture.min_frames {
            return Err(CaptureError::InsufficientFrames {
                accepted: input.store.len(),
                required: config.capture.min_frames,
            }
            .into());
        }
        Ok(())
    }

    fn on_input_change() -> InvalidationPolicy {
        InvalidationPolicy::CLEAR_COMPUTED
    }

    fn export(output: &Self::Output, config: &Self::Config) -> Result<Self::Export> {
        Ok(CalibrationSummary::new(output, &config.layout, current_timestamp()))
    }
}
