use std::time::Duration;

use quadcal_core::synthetic::rig::SyntheticRig;
use quadcal_core::{ImageSize, NUM_CAMERAS};
use quadcal_imaging::{BrightnessCompensation, DetectorConfig, TargetConfig};
use quadcal_optim::PlanarIntrinsicsOptions;
use quadcal_pipeline::capture::{capture_calibration_frames, CaptureConfig, CaptureError};
use quadcal_pipeline::hardware::{FixedSettings, Settings, SyntheticFrameSource};
use quadcal_pipeline::highres::{load_or_capture, HighResConfig, HighResIntrinsics};
use quadcal_pipeline::quad_rig::{run_live_calibration, QuadRigConfig};
use quadcal_pipeline::reconfigure::SharedCamera;

fn capture_config(target_frames: usize, min_frames: usize) -> CaptureConfig {
    CaptureConfig {
        target_frames,
        min_frames,
        ..CaptureConfig::default()
    }
    .immediate()
}

fn resolution(camera: &SharedCamera) -> ImageSize {
    camera
        .run_bounded(Duration::from_secs(1), |source, _| Ok(source.resolution()))
        .unwrap()
}

#[test]
fn quorum_rule_rejects_two_of_four() {
    // Even frames: cameras 2 and 3 blocked. Odd frames: camera 1 blocked.
    let source = SyntheticFrameSource::new(SyntheticRig::default()).with_occlusion(|frame, cam| {
        if frame % 2 == 0 {
            cam >= 2
        } else {
            cam == 1
        }
    });
    let camera = SharedCamera::new(source);
    let cfg = capture_config(4, 4);

    let outcome = capture_calibration_frames(
        &camera,
        &FixedSettings::default(),
        &TargetConfig::default(),
        &DetectorConfig::default(),
        &BrightnessCompensation::default(),
        &cfg,
    )
    .unwrap();

    assert_eq!(outcome.store.len(), 4);
    assert_eq!(outcome.attempts, 8);
    assert_eq!(outcome.rejected, 4);
    assert_eq!(outcome.store.detection_counts(), [4, 0, 4, 4]);
    assert!(outcome.saved_frames.is_empty());
    let held_out = outcome.held_out.unwrap();
    assert_eq!(held_out[0].dimensions(), (640, 400));
}

#[test]
fn too_few_accepted_frames_is_fatal() {
    let source = SyntheticFrameSource::new(SyntheticRig::default()).with_occlusion(|frame, cam| frame % 3 != 0 && cam < 2);
    let camera = SharedCamera::new(source);
    let cfg = CaptureConfig {
        attempt_multiplier: 1,
        ..capture_config(6, 5)
    };

    let err = capture_calibration_frames(
        &camera,
        &FixedSettings::default(),
        &TargetConfig::default(),
        &DetectorConfig::default(),
        &BrightnessCompensation::default(),
        &cfg,
    )
    .unwrap_err();
    assert!(
        matches!(err, CaptureError::InsufficientFrames { accepted: 2, required: 5 }),
        "{err}"
    );
}

#[test]
fn capture_timeout_flags_camera_for_restore() {
    let mut source = SyntheticFrameSource::new(SyntheticRig::default());
    source.latency = Duration::from_millis(400);
    let camera = SharedCamera::new(source);
    let cfg = CaptureConfig {
        capture_timeout_ms: 50,
        ..capture_config(4, 4)
    };

    let err = capture_calibration_frames(
        &camera,
        &FixedSettings::default(),
        &TargetConfig::default(),
        &DetectorConfig::default(),
        &BrightnessCompensation::default(),
        &cfg,
    )
    .unwrap_err();
    assert!(matches!(err, CaptureError::Timeout(_)), "{err}");
    assert!(camera.needs_restore());
}

#[test]
fn live_calibration_saves_frames_and_produces_output() {
    let dir = tempfile::tempdir().unwrap();
    let camera = SharedCamera::new(SyntheticFrameSource::new(SyntheticRig::default()));
    let mut config = QuadRigConfig::default();
    config.capture = CaptureConfig {
        save_frames: true,
        frame_dir: dir.path().join("frames"),
        ..capture_config(20, 15)
    };

    let session = run_live_calibration(&camera, &FixedSettings::default(), config).unwrap();
    let input = session.require_input().unwrap();
    assert_eq!(input.store.len(), 20);
    assert_eq!(input.camera_size, ImageSize::new(640, 400));

    let paths = input.validation_frames.as_ref().unwrap();
    for (cam, path) in paths.iter().enumerate() {
        assert!(path.exists());
        assert!(path.to_string_lossy().ends_with(&format!("_cam{cam}.png")));
    }

    let output = session.require_output().unwrap();
    assert!(output.intrinsics.iter().all(Option::is_some));
    assert_eq!(output.validation.as_ref().unwrap().pair_results.len(), 4);
    assert!(session.log.iter().any(|e| e.operation == "capture" && e.success));
}

#[test]
fn highres_intrinsics_are_cached_and_rescaled() {
    let dir = tempfile::tempdir().unwrap();
    let rig = SyntheticRig::default();
    let camera = SharedCamera::new(SyntheticFrameSource::new(rig.clone()));
    let capture = capture_config(10, 10);
    let highres = HighResConfig {
        enabled: true,
        resolution: ImageSize::new(5120, 800),
        target_frames: 10,
        min_frames: 10,
        capture_delay_ms: 0,
        cache_path: dir.path().join("highres_intrinsics.json"),
        ..HighResConfig::default()
    };
    let run = || {
        load_or_capture(
            &camera,
            &FixedSettings(Settings::default()),
            &TargetConfig::default(),
            &DetectorConfig::default(),
            &BrightnessCompensation::default(),
            &capture,
            &highres,
            &PlanarIntrinsicsOptions::default(),
        )
        .unwrap()
    };

    let first = run();
    assert!(highres.cache_path.exists());
    assert_eq!(resolution(&camera), capture.working_resolution);
    assert!(!camera.needs_restore());
    for (intr, truth) in first.iter().zip(&rig.intrinsics) {
        assert_eq!(intr.image_size, ImageSize::new(640, 400));
        assert!((intr.k.fx - truth.k.fx).abs() / truth.k.fx < 0.01, "{} vs {}", intr.k.fx, truth.k.fx);
    }

    let cached = HighResIntrinsics::load(&highres.cache_path).unwrap().unwrap();
    assert_eq!(cached.intrinsics[0].image_size, ImageSize::new(1280, 800));
    assert!(cached.frames_used >= 10);

    // Second call reads the cache without touching the camera.
    let frames_before = cached.frames_used;
    let second = run();
    assert_eq!(second, first);
    assert_eq!(
        HighResIntrinsics::load(&highres.cache_path).unwrap().unwrap().frames_used,
        frames_before
    );
    assert_eq!(NUM_CAMERAS, second.len());
}
