//! Interfaces to the camera hardware.
//!
//! The calibration core only ever issues `capture` and `reconfigure` calls
//! through [`FrameSource`]. Camera control values come from a
//! [`SettingsProvider`] that is queried right before each hardware
//! operation.

use std::time::Duration;

use image::{imageops, GrayImage};
use quadcal_core::synthetic::rig::SyntheticRig;
use quadcal_core::{ImageSize, NUM_CAMERAS};
use quadcal_imaging::synthetic::{render_board, ViewRays};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::{attempt, RetryError, RetryPolicy};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HardwareError {
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("reconfigure to {resolution} failed: {reason}")]
    Reconfigure { resolution: ImageSize, reason: String },
}

/// Camera control values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Microseconds.
    pub exposure_time: u32,
    pub analogue_gain: f32,
    pub contrast: f32,
    pub auto_exposure: bool,
    pub auto_white_balance: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            exposure_time: 10_000,
            analogue_gain: 1.5,
            contrast: 1.2,
            auto_exposure: false,
            auto_white_balance: false,
        }
    }
}

impl Settings {
    /// Whether `applied` matches `self` within `tol`.
    pub fn matches(&self, applied: &Settings, tol: &ControlTolerance) -> bool {
        self.exposure_time.abs_diff(applied.exposure_time) < tol.exposure_us
            && (self.analogue_gain - applied.analogue_gain).abs() < tol.gain
    }
}

/// Accepted read-back deviation after applying controls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlTolerance {
    pub exposure_us: u32,
    pub gain: f32,
}

impl ControlTolerance {
    /// Tolerance when switching to a capture configuration.
    pub const APPLY: Self = Self {
        exposure_us: 10_000,
        gain: 0.5,
    };

    /// Tighter tolerance when restoring the preview configuration.
    pub const RESTORE: Self = Self {
        exposure_us: 2_000,
        gain: 0.3,
    };
}

/// Source of fresh camera settings. Call [`SettingsProvider::current`]
/// immediately before every hardware operation; never cache the result.
pub trait SettingsProvider: Send + Sync {
    fn current(&self) -> Settings;
}

/// A provider that always returns the same settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedSettings(pub Settings);

impl SettingsProvider for FixedSettings {
    fn current(&self) -> Settings {
        self.0
    }
}

impl<F> SettingsProvider for F
where
    F: Fn() -> Settings + Send + Sync,
{
    fn current(&self) -> Settings {
        self()
    }
}

/// A camera delivering the four sensor images side by side.
pub trait FrameSource: Send {
    /// Grab one combined frame at the active resolution.
    fn capture(&mut self) -> Result<GrayImage, HardwareError>;

    /// Stop, switch resolution and controls, restart.
    fn reconfigure(&mut self, resolution: ImageSize, controls: &Settings) -> Result<(), HardwareError>;

    /// Controls as read back from the device.
    fn applied_controls(&self) -> Settings;

    /// Active combined resolution.
    fn resolution(&self) -> ImageSize;
}

/// Reconfigure and confirm the device reports the requested controls,
/// retrying under `policy`.
///
/// # Errors
///
/// [`RetryError`] once `policy.max_tries` attempts failed or read back
/// values outside `tol`.
pub fn apply_controls(
    source: &mut dyn FrameSource,
    resolution: ImageSize,
    controls: &Settings,
    policy: &RetryPolicy,
    tol: &ControlTolerance,
) -> Result<(), RetryError> {
    let settle = policy.settle();
    attempt(
        |_| {
            source.reconfigure(resolution, controls)?;
            std::thread::sleep(settle);
            Ok::<_, HardwareError>(source.applied_controls())
        },
        |applied| {
            let ok = controls.matches(applied, tol);
            if !ok {
                tracing::debug!(
                    requested = controls.exposure_time,
                    applied = applied.exposure_time,
                    "control read-back mismatch"
                );
            }
            ok
        },
        policy.max_tries,
        policy.backoff(),
    )
    .map(|_| ())
}

/// Renders the synthetic rig's checkerboard for successive frames.
///
/// Intrinsics are rescaled to whatever resolution the source is switched
/// to. Cameras hidden by `occlusion(frame, cam)` return a flat grey view.
pub struct SyntheticFrameSource {
    rig: SyntheticRig,
    resolution: ImageSize,
    controls: Settings,
    frame: usize,
    cycle: usize,
    occlusion: fn(usize, usize) -> bool,
    rays: Option<Vec<ViewRays>>,
    /// Added to every capture; zero by default.
    pub latency: Duration,
}

impl SyntheticFrameSource {
    /// Number of distinct board poses before the sequence repeats.
    pub const DEFAULT_CYCLE: usize = 40;

    pub fn new(rig: SyntheticRig) -> Self {
        let cam = rig.intrinsics[0].image_size;
        Self {
            rig,
            resolution: ImageSize::new(cam.width * NUM_CAMERAS as u32, cam.height),
            controls: Settings::default(),
            frame: 0,
            cycle: Self::DEFAULT_CYCLE,
            occlusion: |_, _| false,
            rays: None,
            latency: Duration::ZERO,
        }
    }

    pub fn with_occlusion(mut self, occlusion: fn(usize, usize) -> bool) -> Self {
        self.occlusion = occlusion;
        self
    }

    pub fn rig(&self) -> &SyntheticRig {
        &self.rig
    }

    /// Index of the next frame to be rendered.
    pub fn frame_index(&self) -> usize {
        self.frame
    }

    fn camera_size(&self) -> ImageSize {
        ImageSize::new(self.resolution.width / NUM_CAMERAS as u32, self.resolution.height)
    }

    fn rays(&mut self) -> &[ViewRays] {
        let size = self.camera_size();
        let rig = &self.rig;
        self.rays.get_or_insert_with(|| {
            rig.intrinsics
                .iter()
                .map(|intr| ViewRays::new(&intr.rescaled_to(size)))
                .collect()
        })
    }
}

impl FrameSource for SyntheticFrameSource {
    fn capture(&mut self) -> Result<GrayImage, HardwareError> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let idx = self.frame % self.cycle;
        let cam_size = self.camera_size();
        let occlusion = self.occlusion;
        let frame = self.frame;
        let rig = self.rig.clone();
        let rays = self.rays();

        let mut combined = GrayImage::new(cam_size.width * NUM_CAMERAS as u32, cam_size.height);
        for (cam, rays) in rays.iter().enumerate() {
            let view = if occlusion(frame, cam) {
                GrayImage::from_pixel(cam_size.width, cam_size.height, image::Luma([128]))
            } else {
                let cam_se3_target = rig.poses[cam].cam_se3_rig() * rig.rig_se3_target(idx);
                render_board(rays, &cam_se3_target, rig.pattern, rig.square_size)
            };
            imageops::replace(&mut combined, &view, (cam as u32 * cam_size.width) as i64, 0);
        }
        self.frame += 1;
        Ok(combined)
    }

    fn reconfigure(&mut self, resolution: ImageSize, controls: &Settings) -> Result<(), HardwareError> {
        if resolution.width % NUM_CAMERAS as u32 != 0 || resolution.height == 0 {
            return Err(HardwareError::Reconfigure {
                resolution,
                reason: "resolution does not split into four views".into(),
            });
        }
        if resolution != self.resolution {
            self.rays = None;
        }
        self.resolution = resolution;
        self.controls = *controls;
        Ok(())
    }

    fn applied_controls(&self) -> Settings {
        self.controls
    }

    fn resolution(&self) -> ImageSize {
        self.resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerance_checks_exposure_and_gain() {
        let want = Settings::default();
        let mut got = want;
        got.exposure_time += 1_500;
        assert!(want.matches(&got, &ControlTolerance::APPLY));
        assert!(want.matches(&got, &ControlTolerance::RESTORE));
        got.exposure_time += 1_000;
        assert!(!want.matches(&got, &ControlTolerance::RESTORE));
        got.analogue_gain += 0.6;
        assert!(!want.matches(&got, &ControlTolerance::APPLY));
    }

    #[test]
    fn closure_is_a_settings_provider() {
        let provider = || Settings {
            exposure_time: 20_000,
            ..Settings::default()
        };
        assert_eq!(provider.current().exposure_time, 20_000);
        assert_eq!(FixedSettings::default().current(), Settings::default());
    }

    #[test]
    fn synthetic_source_renders_four_views_and_switches_resolution() {
        let mut source = SyntheticFrameSource::new(SyntheticRig::default());
        assert_eq!(source.resolution(), ImageSize::new(2560, 400));

        let small = ImageSize::new(1280, 200);
        source.reconfigure(small, &Settings::default()).unwrap();
        let frame = source.capture().unwrap();
        assert_eq!(frame.dimensions(), (1280, 200));
        assert_eq!(source.frame_index(), 1);

        assert!(source.reconfigure(ImageSize::new(1281, 200), &Settings::default()).is_err());
    }

    #[test]
    fn occluded_camera_is_flat() {
        let mut source = SyntheticFrameSource::new(SyntheticRig::default()).with_occlusion(|_, cam| cam == 2);
        source.reconfigure(ImageSize::new(1280, 200), &Settings::default()).unwrap();
        let frame = source.capture().unwrap();
        let view = imageops::crop_imm(&frame, 640, 0, 320, 200).to_image();
        assert!(view.pixels().all(|p| p.0[0] == 128));
    }

    #[test]
    fn apply_controls_verifies_read_back() {
        let mut source = SyntheticFrameSource::new(SyntheticRig::default());
        let policy = RetryPolicy {
            max_tries: 2,
            backoff_ms: 0,
            settle_ms: 0,
        };
        let controls = Settings {
            exposure_time: 20_000,
            ..Settings::default()
        };
        apply_controls(&mut source, ImageSize::new(2560, 400), &controls, &policy, &ControlTolerance::APPLY).unwrap();
        assert_eq!(source.applied_controls().exposure_time, 20_000);
    }
}
