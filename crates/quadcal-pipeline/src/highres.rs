//! High-resolution intrinsics: capture once, cache, rescale.
//!
//! Intrinsics are calibrated at a higher sensor resolution with longer
//! exposure, written to a fixed cache path and reused across sessions
//! until the file is deleted. Before use they are rescaled to the working
//! resolution; distortion carries over unchanged.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use quadcal_core::{CameraIntrinsics, CorrespondenceView, ImageSize, NUM_CAMERAS};
use quadcal_imaging::{split_equal_width, BrightnessCompensation, DetectorConfig, TargetConfig};
use quadcal_optim::{calibrate_camera, PlanarIntrinsicsOptions};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::capture::{assemble_frame, configure_camera, detect_views, CaptureConfig};
use crate::hardware::{ControlTolerance, Settings, SettingsProvider};
use crate::reconfigure::SharedCamera;
use crate::session::current_timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighResConfig {
    pub enabled: bool,
    /// Combined sensor resolution during high-resolution capture.
    pub resolution: ImageSize,
    pub target_frames: usize,
    pub attempt_multiplier: usize,
    pub min_frames: usize,
    pub exposure_multiplier: f32,
    /// Microseconds.
    pub max_exposure: u32,
    pub capture_delay_ms: u64,
    pub cache_path: PathBuf,
}

impl Default for HighResConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            resolution: ImageSize::new(5120, 800),
            target_frames: 15,
            attempt_multiplier: 3,
            min_frames: 10,
            exposure_multiplier: 2.0,
            max_exposure: 50_000,
            capture_delay_ms: 500,
            cache_path: PathBuf::from("highres_intrinsics.json"),
        }
    }
}

impl HighResConfig {
    /// Controls for high-resolution capture derived from the preview
    /// controls: longer exposure, automatic control off.
    pub fn controls(&self, preview: &Settings) -> Settings {
        let exposure = (preview.exposure_time as f32 * self.exposure_multiplier).round();
        Settings {
            exposure_time: (exposure as u32).min(self.max_exposure),
            auto_exposure: false,
            auto_white_balance: false,
            ..*preview
        }
    }

    pub fn camera_size(&self) -> ImageSize {
        ImageSize::new(self.resolution.width / NUM_CAMERAS as u32, self.resolution.height)
    }
}

/// Cached result of a high-resolution calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighResIntrinsics {
    pub timestamp: u64,
    pub frames_used: usize,
    /// Per camera, at the high resolution.
    pub intrinsics: [CameraIntrinsics; NUM_CAMERAS],
}

impl HighResIntrinsics {
    /// Intrinsics rescaled to a camera view of `size`.
    pub fn rescaled_to(&self, size: ImageSize) -> [CameraIntrinsics; NUM_CAMERAS] {
        self.intrinsics.map(|intr| intr.rescaled_to(size))
    }

    /// `Ok(None)` if no cache file exists.
    ///
    /// # Errors
    ///
    /// The file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let cached = serde_json::from_str(&json)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(cached))
    }

    /// # Errors
    ///
    /// Serialization or filesystem failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("writing {}", path.display()))
    }
}

/// Capture at high resolution and calibrate every camera.
///
/// Only frames in which all four cameras detected the target count. The
/// working configuration is restored afterwards in every case.
///
/// # Errors
///
/// Camera failures, a failed restore, fewer than `min_frames` complete
/// frames, or a camera that fails to calibrate.
#[allow(clippy::too_many_arguments)]
pub fn capture_highres_intrinsics(
    camera: &SharedCamera,
    settings: &dyn SettingsProvider,
    target: &TargetConfig,
    detector: &DetectorConfig,
    brightness: &BrightnessCompensation,
    capture: &CaptureConfig,
    cfg: &HighResConfig,
    opts: &PlanarIntrinsicsOptions,
) -> Result<HighResIntrinsics> {
    let controls = cfg.controls(&settings.current());
    info!(
        resolution = %cfg.resolution,
        exposure = controls.exposure_time,
        "switching to high-resolution capture"
    );
    configure_camera(
        camera,
        &crate::hardware::FixedSettings(controls),
        cfg.resolution,
        capture.retry,
        ControlTolerance::APPLY,
        capture.capture_timeout(),
    )
    .context("switching to high resolution")?;

    let captured = collect_views(camera, target, detector, brightness, capture, cfg);

    // Re-read settings: the preview may have changed them meanwhile.
    let restored = configure_camera(
        camera,
        settings,
        capture.working_resolution,
        capture.retry,
        ControlTolerance::RESTORE,
        capture.capture_timeout(),
    );
    match &restored {
        Ok(()) => {
            camera.mark_restored();
            info!(resolution = %capture.working_resolution, "working configuration restored");
        }
        Err(e) => warn!(error = %e, "could not restore working configuration"),
    }

    let views = captured?;
    restored.context("restoring working configuration")?;

    let frames_used = views[0].len();
    ensure!(
        frames_used >= cfg.min_frames,
        "only {frames_used} high-resolution frames, {} required",
        cfg.min_frames
    );

    let size = cfg.camera_size();
    let mut intrinsics = Vec::with_capacity(NUM_CAMERAS);
    for (cam, views) in views.iter().enumerate() {
        let estimate = calibrate_camera(views, size, opts)
            .with_context(|| format!("high-resolution calibration of camera {cam}"))?;
        info!(
            camera = cam,
            rms = estimate.stats.rms,
            "high-resolution intrinsics"
        );
        intrinsics.push(estimate.intrinsics);
    }
    let intrinsics: [CameraIntrinsics; NUM_CAMERAS] = intrinsics
        .try_into()
        .map_err(|_| anyhow!("expected {NUM_CAMERAS} cameras"))?;

    Ok(HighResIntrinsics {
        timestamp: current_timestamp(),
        frames_used,
        intrinsics,
    })
}

fn collect_views(
    camera: &SharedCamera,
    target: &TargetConfig,
    detector: &DetectorConfig,
    brightness: &BrightnessCompensation,
    capture: &CaptureConfig,
    cfg: &HighResConfig,
) -> Result<[Vec<CorrespondenceView>; NUM_CAMERAS]> {
    let mut views: [Vec<CorrespondenceView>; NUM_CAMERAS] = Default::default();
    let mut attempts = 0;
    let max_attempts = cfg.target_frames * cfg.attempt_multiplier;
    while views[0].len() < cfg.target_frames && attempts < max_attempts {
        attempts += 1;
        let combined = camera.capture(capture.capture_timeout())?;
        let split = split_equal_width(&combined)?;
        let detections = detect_views(&split, target, detector, brightness);
        match assemble_frame(detections, target, NUM_CAMERAS) {
            Some(frame) => {
                for (cam, list) in views.iter_mut().enumerate() {
                    list.extend(frame.view(cam));
                }
                info!(frame = views[0].len(), target = cfg.target_frames, "high-resolution frame accepted");
            }
            None => tracing::debug!(attempt = attempts, "high-resolution frame rejected"),
        }
        if cfg.capture_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(cfg.capture_delay_ms));
        }
    }
    Ok(views)
}

/// Cached high-resolution intrinsics, capturing them first if the cache
/// is empty. Returns the intrinsics rescaled to the working camera size.
///
/// # Errors
///
/// Any failure of [`capture_highres_intrinsics`] or of the cache file.
#[allow(clippy::too_many_arguments)]
pub fn load_or_capture(
    camera: &SharedCamera,
    settings: &dyn SettingsProvider,
    target: &TargetConfig,
    detector: &DetectorConfig,
    brightness: &BrightnessCompensation,
    capture: &CaptureConfig,
    cfg: &HighResConfig,
    opts: &PlanarIntrinsicsOptions,
) -> Result<[CameraIntrinsics; NUM_CAMERAS]> {
    let cached = match HighResIntrinsics::load(&cfg.cache_path)? {
        Some(cached) => {
            info!(path = %cfg.cache_path.display(), "using cached high-resolution intrinsics");
            cached
        }
        None => {
            let fresh =
                capture_highres_intrinsics(camera, settings, target, detector, brightness, capture, cfg, opts)?;
            fresh.save(&cfg.cache_path)?;
            info!(path = %cfg.cache_path.display(), "cached high-resolution intrinsics");
            fresh
        }
    };
    Ok(cached.rescaled_to(capture.camera_size()))
}
