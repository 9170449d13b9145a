//! Capture loop feeding the correspondence store.
//!
//! Each attempt grabs one combined frame, splits it into the four camera
//! views and runs the Target Detector on every view in parallel. A frame
//! is accepted when at least `quorum` cameras saw the target.

use std::path::{Path, PathBuf};
use std::time::Duration;

use image::GrayImage;
use quadcal_core::{CalibrationFrame, CorrespondenceStore, ImageSize, Pt2, NUM_CAMERAS};
use quadcal_imaging::{
    detect_target, split_equal_width, BrightnessCompensation, DetectorConfig, FrameError, TargetConfig,
    TargetDetection,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::hardware::{apply_controls, ControlTolerance, HardwareError, SettingsProvider};
use crate::reconfigure::SharedCamera;
use crate::retry::{RetryError, RetryPolicy};
use crate::session::current_timestamp_ms;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera operation timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error("camera controls not confirmed: {0}")]
    Unverified(#[from] RetryError),
    #[error("camera is busy with another operation")]
    Busy,
    #[error("camera operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("failed to write {}: {reason}", .path.display())]
    Save { path: PathBuf, reason: String },
    #[error("only {accepted} frames accepted, {required} required")]
    InsufficientFrames { accepted: usize, required: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub target_frames: usize,
    /// Below this the whole calibration run aborts.
    pub min_frames: usize,
    /// Attempt budget is `target_frames * attempt_multiplier`.
    pub attempt_multiplier: usize,
    /// Cameras that must see the target for a frame to count.
    pub quorum: usize,
    pub stabilization_delay_ms: u64,
    /// Time to reposition the target after an accepted frame.
    pub accept_delay_ms: u64,
    pub reject_delay_ms: u64,
    /// Budget for one capture or reconfiguration.
    pub capture_timeout_ms: u64,
    /// Combined sensor resolution (four views side by side).
    pub working_resolution: ImageSize,
    pub save_frames: bool,
    pub frame_dir: PathBuf,
    pub retry: RetryPolicy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_frames: 20,
            min_frames: 15,
            attempt_multiplier: 3,
            quorum: 3,
            stabilization_delay_ms: 50,
            accept_delay_ms: 500,
            reject_delay_ms: 100,
            capture_timeout_ms: 5_000,
            working_resolution: ImageSize::new(2560, 400),
            save_frames: true,
            frame_dir: PathBuf::from("calibration_frames"),
            retry: RetryPolicy::default(),
        }
    }
}

impl CaptureConfig {
    pub fn max_attempts(&self) -> usize {
        self.target_frames * self.attempt_multiplier
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    /// Resolution of a single camera view.
    pub fn camera_size(&self) -> ImageSize {
        ImageSize::new(
            self.working_resolution.width / NUM_CAMERAS as u32,
            self.working_resolution.height,
        )
    }

    /// Delays zeroed and frame saving disabled.
    pub fn immediate(mut self) -> Self {
        self.stabilization_delay_ms = 0;
        self.accept_delay_ms = 0;
        self.reject_delay_ms = 0;
        self.save_frames = false;
        self.retry.backoff_ms = 0;
        self.retry.settle_ms = 0;
        self
    }
}

/// Result of a capture session.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub store: CorrespondenceStore,
    pub attempts: usize,
    pub rejected: usize,
    /// Raw views of the last accepted frame, kept for validation.
    pub held_out: Option<[GrayImage; NUM_CAMERAS]>,
    /// Per-camera files written for each accepted frame.
    pub saved_frames: Vec<[PathBuf; NUM_CAMERAS]>,
}

/// Detect the target in all four views.
///
/// Views are brightness-compensated per camera before detection; the four
/// detections run in parallel and do not depend on each other.
pub fn detect_views(
    views: &[GrayImage; NUM_CAMERAS],
    target: &TargetConfig,
    detector: &DetectorConfig,
    brightness: &BrightnessCompensation,
) -> [Option<TargetDetection>; NUM_CAMERAS] {
    let found: Vec<_> = views
        .par_iter()
        .enumerate()
        .map(|(cam, view)| detect_target(&brightness.apply(cam, view), target, detector))
        .collect();
    let mut found = found.into_iter();
    std::array::from_fn(|_| found.next().flatten())
}

/// Turn per-camera detections into a frame if enough cameras agree.
///
/// With several candidate grids a camera may report a different pattern
/// than its neighbours; only detections of the most common pattern are
/// kept (ties go to the first camera's pattern).
pub fn assemble_frame(
    detections: [Option<TargetDetection>; NUM_CAMERAS],
    target: &TargetConfig,
    quorum: usize,
) -> Option<CalibrationFrame> {
    let patterns: Vec<(usize, usize)> = detections.iter().flatten().map(|d| d.pattern).collect();
    let pattern = patterns
        .iter()
        .copied()
        .max_by_key(|p| {
            let count = patterns.iter().filter(|q| *q == p).count();
            let first = patterns.iter().position(|q| q == p).unwrap_or(0);
            (count, std::cmp::Reverse(first))
        })?;

    let corners: [Option<Vec<Pt2>>; NUM_CAMERAS] =
        detections.map(|d| d.filter(|d| d.pattern == pattern).map(|d| d.corners));
    let seen = corners.iter().filter(|c| c.is_some()).count();
    if seen < quorum {
        return None;
    }
    CalibrationFrame::new(target.object_points(pattern), corners).ok()
}

fn save_views(dir: &Path, views: &[GrayImage; NUM_CAMERAS]) -> Result<[PathBuf; NUM_CAMERAS], CaptureError> {
    std::fs::create_dir_all(dir).map_err(|e| CaptureError::Save {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;
    let stamp = current_timestamp_ms();
    let paths: [PathBuf; NUM_CAMERAS] =
        std::array::from_fn(|cam| dir.join(format!("frame_{stamp}_cam{cam}.png")));
    for (path, view) in paths.iter().zip(views) {
        view.save(path).map_err(|e| CaptureError::Save {
            path: path.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(paths)
}

/// Switch the camera to `resolution` with fresh settings and verify the
/// read-back within the capture timeout.
///
/// # Errors
///
/// Timeout, hardware or verification failure; the camera is then flagged
/// as needing restore.
pub fn configure_camera(
    camera: &SharedCamera,
    settings: &dyn SettingsProvider,
    resolution: ImageSize,
    policy: RetryPolicy,
    tol: ControlTolerance,
    timeout: Duration,
) -> Result<(), CaptureError> {
    let controls = settings.current();
    camera.run_bounded(timeout, move |source, cancel| {
        cancel.check()?;
        apply_controls(source, resolution, &controls, &policy, &tol)?;
        Ok(())
    })
}

/// Run the interactive capture loop.
///
/// Stops after `target_frames` accepted frames or when the attempt budget
/// is used up.
///
/// # Errors
///
/// Camera failures propagate immediately. Fewer than `min_frames` accepted
/// frames yields [`CaptureError::InsufficientFrames`].
pub fn capture_calibration_frames(
    camera: &SharedCamera,
    settings: &dyn SettingsProvider,
    target: &TargetConfig,
    detector: &DetectorConfig,
    brightness: &BrightnessCompensation,
    cfg: &CaptureConfig,
) -> Result<CaptureOutcome, CaptureError> {
    configure_camera(
        camera,
        settings,
        cfg.working_resolution,
        cfg.retry,
        ControlTolerance::APPLY,
        cfg.capture_timeout(),
    )?;

    let mut outcome = CaptureOutcome {
        store: CorrespondenceStore::new(),
        attempts: 0,
        rejected: 0,
        held_out: None,
        saved_frames: Vec::new(),
    };
    let max_attempts = cfg.max_attempts();
    info!(target_frames = cfg.target_frames, max_attempts, "capturing calibration frames");

    while outcome.store.len() < cfg.target_frames && outcome.attempts < max_attempts {
        outcome.attempts += 1;
        sleep_ms(cfg.stabilization_delay_ms);

        let combined = camera.capture(cfg.capture_timeout())?;
        let views = split_equal_width(&combined)?;
        let detections = detect_views(&views, target, detector, brightness);
        let seen: Vec<usize> = (0..NUM_CAMERAS).filter(|&c| detections[c].is_some()).collect();

        let accepted = match assemble_frame(detections, target, cfg.quorum) {
            Some(frame) => match outcome.store.push(frame) {
                Ok(()) => true,
                Err(e) => {
                    warn!(attempt = outcome.attempts, error = %e, "frame does not match stored grid");
                    false
                }
            },
            None => false,
        };

        if accepted {
            if cfg.save_frames {
                outcome.saved_frames.push(save_views(&cfg.frame_dir, &views)?);
            }
            outcome.held_out = Some(views);
            info!(
                frame = outcome.store.len(),
                target = cfg.target_frames,
                cameras = ?seen,
                "frame accepted"
            );
            sleep_ms(cfg.accept_delay_ms);
        } else {
            outcome.rejected += 1;
            debug!(attempt = outcome.attempts, cameras = ?seen, "frame rejected");
            sleep_ms(cfg.reject_delay_ms);
        }
    }

    if outcome.store.len() < cfg.min_frames {
        warn!(
            accepted = outcome.store.len(),
            required = cfg.min_frames,
            attempts = outcome.attempts,
            "not enough calibration frames"
        );
        return Err(CaptureError::InsufficientFrames {
            accepted: outcome.store.len(),
            required: cfg.min_frames,
        });
    }
    info!(
        accepted = outcome.store.len(),
        attempts = outcome.attempts,
        "capture complete"
    );
    Ok(outcome)
}

fn sleep_ms(ms: u64) {
    if ms > 0 {
        std::thread::sleep(Duration::from_millis(ms));
    }
}
