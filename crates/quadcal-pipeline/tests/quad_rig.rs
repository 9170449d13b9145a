use image::GrayImage;
use quadcal_core::synthetic::noise::UniformPixelNoise;
use quadcal_core::synthetic::rig::SyntheticRig;
use quadcal_core::{CalibrationFrame, CorrespondenceStore, ImageSize, Real, Vec3, NUM_CAMERAS};
use quadcal_imaging::synthetic::{render_wall, ViewRays};
use quadcal_pipeline::artifacts::{
    read_json, write_artifacts, StereoMapArtifact, INTRINSICS_FILE, POSES_FILE, SUMMARY_FILE, VALIDATION_FILE,
};
use quadcal_pipeline::capture::CaptureError;
use quadcal_pipeline::quad_rig::{
    run_calibration, run_calibration_with_images, step_bundle_refine, step_finalize, step_intrinsics,
    step_pairwise_poses, step_rectification, step_reference_frame, step_validate, QuadRigInput,
    QuadRigProblem, SkipReason, ValidateOptions,
};
use quadcal_pipeline::session::CalibrationSession;
use quadcal_pipeline::CalibrationSummary;

const CAMERA_SIZE: ImageSize = ImageSize::new(640, 400);

fn noise() -> UniformPixelNoise {
    UniformPixelNoise {
        seed: 7,
        max_abs_px: 0.1,
    }
}

fn wall_images(rig: &SyntheticRig) -> [GrayImage; NUM_CAMERAS] {
    std::array::from_fn(|cam| {
        let rays = ViewRays::new(&rig.intrinsics[cam]);
        render_wall(&rays, &rig.poses[cam].cam_se3_rig(), 1000.0, 42)
    })
}

fn session_with(store: CorrespondenceStore) -> CalibrationSession<QuadRigProblem> {
    let mut session = CalibrationSession::<QuadRigProblem>::with_description("synthetic rig");
    session
        .set_input(QuadRigInput::new(store, CAMERA_SIZE))
        .unwrap();
    session
}

fn mean_tvec(poses: &[quadcal_core::CameraPose; NUM_CAMERAS]) -> Vec3 {
    poses.iter().map(|p| p.tvec).sum::<Vec3>() / NUM_CAMERAS as Real
}

#[test]
fn synthetic_rig_end_to_end() {
    let rig = SyntheticRig::default();
    let store = rig.generate_store(20, noise()).unwrap();
    let mut session = session_with(store);

    run_calibration_with_images(&mut session, Some(wall_images(&rig))).unwrap();
    let output = session.require_output().unwrap().clone();

    assert_eq!(output.frames_captured, 20);
    assert!(!output.use_highres_intrinsics);
    for (cam, (intr, truth)) in output.intrinsics.iter().zip(&rig.intrinsics).enumerate() {
        let intr = intr.as_ref().unwrap_or_else(|| panic!("camera {cam} uncalibrated"));
        assert!((intr.k.fx - truth.k.fx).abs() / truth.k.fx < 0.01, "camera {cam} fx {}", intr.k.fx);
        assert!((intr.k.cx - truth.k.cx).abs() < 3.0, "camera {cam} cx {}", intr.k.cx);
    }
    for (cam, (pose, truth)) in output.poses.iter().zip(&rig.poses).enumerate() {
        assert!(
            (pose.tvec - truth.tvec).norm() < 2.0,
            "camera {cam} position {:?} vs {:?}",
            pose.tvec,
            truth.tvec
        );
        assert!(
            (pose.rvec - truth.rvec).norm() < 5e-3,
            "camera {cam} rotation {:?} vs {:?}",
            pose.rvec,
            truth.rvec
        );
    }

    let refine = output.refine.as_ref().unwrap();
    assert!(refine.final_error <= refine.initial_error);

    let report = output.validation.as_ref().unwrap();
    assert_eq!(report.pair_results.len(), 4);
    for name in ["03", "12", "01", "32"] {
        let pair = &report.pair_results[name];
        assert!(pair.quality_good, "pair {name}: {pair:?}");
    }
    assert!(output.quality_certified());
    assert!(session.state.skipped.is_empty(), "{:?}", session.state.skipped);
}

#[test]
fn reference_frame_is_centred_and_refinement_never_worsens() {
    let rig = SyntheticRig::default();
    let store = rig.generate_store(20, noise()).unwrap();
    let mut session = session_with(store);

    step_intrinsics(&mut session, None).unwrap();
    step_pairwise_poses(&mut session, None).unwrap();
    step_reference_frame(&mut session).unwrap();
    let initial = session.state.poses.unwrap();
    assert!(mean_tvec(&initial).norm() < 1e-9);

    let spacing = session.state.spacing.as_ref().unwrap();
    assert_eq!(spacing.distances.len(), 6);
    assert!(!spacing.suspicious);
    assert!((spacing.mean_spacing_mm - 56.9).abs() < 1.0);

    step_bundle_refine(&mut session, None).unwrap();
    let report = session.state.refine.as_ref().unwrap();
    assert!(report.final_error <= report.initial_error);
    assert!(report.history.windows(2).all(|w| w[1] <= w[0]));
    assert_eq!(session.state.initial_poses, Some(initial));
}

#[test]
fn missing_camera_is_skipped_not_fatal() {
    let rig = SyntheticRig::default();
    let frames: Vec<CalibrationFrame> = (0..20)
        .map(|idx| {
            let detections = std::array::from_fn(|cam| (cam != 2).then(|| rig.project(idx, cam, noise()).unwrap()));
            CalibrationFrame::new(rig.object_points(), detections).unwrap()
        })
        .collect();
    let mut session = session_with(CorrespondenceStore::from_frames(frames).unwrap());

    run_calibration_with_images(&mut session, Some(wall_images(&rig))).unwrap();
    let output = session.require_output().unwrap();

    assert!(output.intrinsics[2].is_none());
    assert_eq!(output.poses[2].rvec, Vec3::zeros());
    assert!((mean_tvec(&session.state.initial_poses.unwrap())).norm() < 1e-9);

    let skipped = &session.state.skipped;
    assert!(skipped.contains(&SkipReason::Intrinsics {
        camera: 2,
        frames: 0,
        required: 10
    }));
    assert!(skipped.contains(&SkipReason::PairUncalibrated { camera: 2 }));
    // No complete frames, so no refinement.
    assert!(skipped
        .iter()
        .any(|s| matches!(s, SkipReason::BundleRefine { complete_frames: 0, .. })));
    assert!(output.refine.is_none());

    let report = output.validation.as_ref().unwrap();
    assert!(!report.pair_results["12"].quality_good);
    assert!(!report.pair_results["32"].quality_good);
    assert!(report.pair_results["03"].quality_good, "{:?}", report.pair_results["03"]);
    assert!(!output.quality_certified());
}

#[test]
fn too_few_frames_abort_before_solving() {
    let rig = SyntheticRig::default();
    let store = rig.generate_store(10, noise()).unwrap();
    let mut session = session_with(store);

    let err = run_calibration(&mut session).unwrap_err();
    match err.downcast_ref::<CaptureError>() {
        Some(CaptureError::InsufficientFrames { accepted, required }) => {
            assert_eq!((*accepted, *required), (10, 15));
        }
        other => panic!("unexpected error {other:?}: {err:#}"),
    }
    assert!(session.state.intrinsics.is_none());
    assert!(!session.has_output());
    assert!(!session.log.last().unwrap().success);
}

#[test]
fn validation_without_images_fails_every_pair() {
    let rig = SyntheticRig::default();
    let mut session = session_with(rig.generate_store(20, noise()).unwrap());

    run_calibration(&mut session).unwrap();
    let output = session.require_output().unwrap();
    let report = output.validation.as_ref().unwrap();
    assert_eq!(report.pair_results.len(), 4);
    assert!(report.pair_results.values().all(|r| !r.quality_good && r.num_matches == 0));
    assert!(!output.quality_certified());
    // Poses are still usable.
    assert!((output.poses[3].tvec - rig.poses[3].tvec).norm() < 2.0);
}

#[test]
fn restored_session_rebuilds_rectification_for_validation() {
    let rig = SyntheticRig::default();
    let mut session = session_with(rig.generate_store(20, noise()).unwrap());
    step_intrinsics(&mut session, None).unwrap();
    step_pairwise_poses(&mut session, None).unwrap();
    step_reference_frame(&mut session).unwrap();
    step_bundle_refine(&mut session, None).unwrap();
    step_rectification(&mut session).unwrap();
    step_finalize(&mut session).unwrap();

    let json = session.to_json().unwrap();
    let mut restored = CalibrationSession::<QuadRigProblem>::from_json(&json).unwrap();
    assert_eq!(restored.state.rectified_pairs.len(), 4);
    assert!(restored.state.rectifications.is_empty());
    assert_eq!(restored.state.poses, session.state.poses);

    step_validate(
        &mut restored,
        Some(ValidateOptions {
            images: Some(wall_images(&rig)),
        }),
    )
    .unwrap();
    assert_eq!(restored.state.rectifications.len(), 4);
    assert!(restored.state.validation.as_ref().unwrap().is_good());
}

#[test]
fn artifacts_are_written_with_fixed_names() {
    let rig = SyntheticRig::default();
    let images = wall_images(&rig);
    let mut session = session_with(rig.generate_store(20, noise()).unwrap());
    run_calibration_with_images(&mut session, Some(images.clone())).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let written = write_artifacts(&mut session, dir.path(), Some(&images)).unwrap();

    for name in [INTRINSICS_FILE, POSES_FILE, VALIDATION_FILE, SUMMARY_FILE] {
        assert!(dir.path().join(name).exists(), "missing {name}");
    }
    for pair in ["03", "12", "01", "32"] {
        for name in [
            format!("unified_stereoMap_{pair}.json"),
            format!("rectified_test_{pair}.png"),
            format!("alignment_verification_{pair}.png"),
        ] {
            assert!(dir.path().join(&name).exists(), "missing {name}");
        }
    }
    assert_eq!(written.len(), 4 + 4 * 3);

    let map: StereoMapArtifact = read_json(&dir.path().join("unified_stereoMap_03.json")).unwrap();
    assert_eq!(map.map1_x.len(), 400);
    assert!(map.roi1[2] > 0 && map.roi1[3] > 0);

    let summary: CalibrationSummary = read_json(&dir.path().join(SUMMARY_FILE)).unwrap();
    assert_eq!(summary.frames_captured, 20);
    assert_eq!(summary.camera_matrices.len(), 4);
    assert_eq!(session.exports.len(), 1);

    let verification = image::open(dir.path().join("alignment_verification_01.png")).unwrap();
    assert_eq!((verification.width(), verification.height()), (640, 400));
    let side_by_side = image::open(dir.path().join("rectified_test_03.png")).unwrap();
    assert_eq!((side_by_side.width(), side_by_side.height()), (1280, 400));
}
