//! Step functions for the four-camera rig.
//!
//! Each step reads what earlier steps left in [`QuadRigState`], does its
//! own work and records local recoveries as [`SkipReason`]s. Only missing
//! prerequisites and the frame-count floor are errors.

use anyhow::{bail, Context, Result};
use image::GrayImage;
use quadcal_core::{CameraIntrinsics, CameraPair, CameraPose, CorrespondenceView, Mat3, Real, Vec3, NUM_CAMERAS};
use quadcal_imaging::{stereo_rectify, validate_pair, PairValidation};
use quadcal_optim::{
    calibrate_camera, calibrate_stereo_extrinsics, refine_rig_poses, RefineConfig, RigRefineFrame,
};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::artifacts::ValidationReport;
use crate::capture::capture_calibration_frames;
use crate::hardware::SettingsProvider;
use crate::highres::load_or_capture;
use crate::reconfigure::SharedCamera;
use crate::session::{current_timestamp, CalibrationSession};

use super::problem::{QuadRigConfig, QuadRigInput, QuadRigOutput, QuadRigProblem};
use super::state::{CameraDistance, IntrinsicsSource, PairwisePose, SkipReason, SpacingReport};

// ─────────────────────────────────────────────────────────────────────────────
// Step Options
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct IntrinsicsOptions {
    /// Override the minimum frame count per camera.
    pub min_frames: Option<usize>,
    /// Use the input's high-resolution intrinsics when present (default: true).
    pub use_highres: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct PairwiseOptions {
    /// Override the minimum number of shared frames.
    pub min_frames: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct RefineOptions {
    /// Override the refiner schedule.
    pub refine: Option<RefineConfig>,
    /// Override the minimum number of complete frames.
    pub min_frames: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Raw per-camera images to validate on instead of the input's files.
    pub images: Option<[GrayImage; NUM_CAMERAS]>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn require_intrinsics(
    session: &CalibrationSession<QuadRigProblem>,
) -> Result<[Option<CameraIntrinsics>; NUM_CAMERAS]> {
    session
        .state
        .intrinsics
        .ok_or_else(|| anyhow::anyhow!("intrinsics not computed; run step_intrinsics first"))
}

fn require_poses(session: &CalibrationSession<QuadRigProblem>) -> Result<[CameraPose; NUM_CAMERAS]> {
    session
        .state
        .poses
        .ok_or_else(|| anyhow::anyhow!("poses not computed; run step_reference_frame first"))
}

/// Relative pose `(R, T)` with `X_b = R · X_a + T` from two centroid-frame
/// poses.
pub fn relative_pose(a: &CameraPose, b: &CameraPose) -> (Mat3, Vec3) {
    let rb = b.rotation();
    (rb * a.rotation().transpose(), rb * (a.tvec - b.tvec))
}

/// Re-express reference-relative poses around the centroid of all four
/// camera positions.
///
/// Missing cameras sit at the reference origin for the centroid and keep
/// an identity rotation. Rotations are carried over unchanged; only
/// positions are re-centred.
pub fn centroid_poses(
    reference: usize,
    pairwise: &[Option<PairwisePose>; NUM_CAMERAS],
) -> [CameraPose; NUM_CAMERAS] {
    let positions: [Vec3; NUM_CAMERAS] = std::array::from_fn(|cam| match &pairwise[cam] {
        Some(p) if cam != reference => p.position(),
        _ => Vec3::zeros(),
    });
    let centroid = positions.iter().sum::<Vec3>() / NUM_CAMERAS as Real;
    std::array::from_fn(|cam| CameraPose {
        rvec: match &pairwise[cam] {
            Some(p) if cam != reference => p.rvec,
            _ => Vec3::zeros(),
        },
        tvec: positions[cam] - centroid,
    })
}

/// Distances between every pair of located cameras.
pub fn spacing_report(
    poses: &[CameraPose; NUM_CAMERAS],
    located: &[bool; NUM_CAMERAS],
    range_mm: (Real, Real),
) -> SpacingReport {
    let mut distances = Vec::new();
    for a in 0..NUM_CAMERAS {
        for b in a + 1..NUM_CAMERAS {
            if located[a] && located[b] {
                distances.push(CameraDistance {
                    pair: CameraPair::new(a, b),
                    distance_mm: (poses[a].tvec - poses[b].tvec).norm(),
                });
            }
        }
    }
    let mean_spacing_mm = if distances.is_empty() {
        0.0
    } else {
        distances.iter().map(|d| d.distance_mm).sum::<Real>() / distances.len() as Real
    };
    let suspicious =
        !distances.is_empty() && (mean_spacing_mm < range_mm.0 || mean_spacing_mm > range_mm.1);
    SpacingReport {
        distances,
        mean_spacing_mm,
        suspicious,
    }
}

fn load_validation_images(input: &QuadRigInput) -> Result<Option<[GrayImage; NUM_CAMERAS]>> {
    let Some(paths) = &input.validation_frames else {
        return Ok(None);
    };
    let mut images = Vec::with_capacity(NUM_CAMERAS);
    for path in paths {
        let img = image::open(path)
            .with_context(|| format!("loading validation image {}", path.display()))?
            .to_luma8();
        images.push(img);
    }
    Ok(images.try_into().ok())
}

// ─────────────────────────────────────────────────────────────────────────────
// Step Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Calibrate every camera from the frames it saw the target in.
///
/// Cameras with fewer than `min_intrinsic_frames` frames, or whose solve
/// fails, are skipped. When the input carries high-resolution intrinsics
/// they are used instead.
///
/// # Errors
///
/// Invalid input/config, or no camera could be calibrated.
pub fn step_intrinsics(
    session: &mut CalibrationSession<QuadRigProblem>,
    opts: Option<IntrinsicsOptions>,
) -> Result<()> {
    session.validate()?;
    let opts = opts.unwrap_or_default();
    let input = session.require_input()?.clone();
    let solver = session.config.solver;
    let min_frames = opts.min_frames.unwrap_or(solver.min_intrinsic_frames);

    if let (Some(highres), true) = (&input.highres_intrinsics, opts.use_highres.unwrap_or(true)) {
        let intrinsics = highres.map(|intr| {
            let intr = if intr.image_size == input.camera_size {
                intr
            } else {
                intr.rescaled_to(input.camera_size)
            };
            Some(intr)
        });
        session.state.intrinsics = Some(intrinsics);
        session.state.intrinsics_source = IntrinsicsSource::HighRes;
        info!("using high-resolution intrinsics for all cameras");
        session.log_success_with_notes("intrinsics", "high-resolution intrinsics");
        return Ok(());
    }

    let results: Vec<Result<CameraIntrinsics, SkipReason>> = (0..NUM_CAMERAS)
        .into_par_iter()
        .map(|cam| {
            let views: Vec<CorrespondenceView> =
                input.store.camera_views(cam).into_iter().map(|(_, v)| v).collect();
            if views.len() < min_frames {
                return Err(SkipReason::Intrinsics {
                    camera: cam,
                    frames: views.len(),
                    required: min_frames,
                });
            }
            calibrate_camera(&views, input.camera_size, &solver.intrinsics)
                .map(|est| CameraIntrinsics {
                    reproj_error: est.stats.mean,
                    ..est.intrinsics
                })
                .map_err(|e| SkipReason::IntrinsicsFailed {
                    camera: cam,
                    error: format!("{e:#}"),
                })
        })
        .collect();

    let mut intrinsics: [Option<CameraIntrinsics>; NUM_CAMERAS] = [None; NUM_CAMERAS];
    for (cam, result) in results.into_iter().enumerate() {
        match result {
            Ok(intr) => {
                info!(
                    camera = cam,
                    fx = intr.k.fx,
                    fy = intr.k.fy,
                    error_px = intr.reproj_error,
                    "camera calibrated"
                );
                intrinsics[cam] = Some(intr);
            }
            Err(reason) => {
                warn!(camera = cam, ?reason, "camera left uncalibrated");
                session.state.skip(reason);
            }
        }
    }

    let calibrated = intrinsics.iter().flatten().count();
    if calibrated == 0 {
        session.log_failure("intrinsics", "no camera could be calibrated");
        bail!("no camera could be calibrated");
    }
    session.state.intrinsics = Some(intrinsics);
    session.state.intrinsics_source = IntrinsicsSource::Standard;
    session.log_success_with_notes("intrinsics", format!("{calibrated} of {NUM_CAMERAS} cameras"));
    Ok(())
}

/// Solve each camera's pose relative to the reference camera with both
/// intrinsics fixed.
///
/// Pairs without intrinsics or with fewer than `min_pair_frames` shared
/// frames are skipped and later default to identity.
///
/// # Errors
///
/// Intrinsics missing, or the reference camera is uncalibrated.
pub fn step_pairwise_poses(
    session: &mut CalibrationSession<QuadRigProblem>,
    opts: Option<PairwiseOptions>,
) -> Result<()> {
    let intrinsics = require_intrinsics(session)?;
    let opts = opts.unwrap_or_default();
    let reference = session.config.layout.reference_camera;
    let solver = session.config.solver;
    let min_frames = opts.min_frames.unwrap_or(solver.min_pair_frames);
    let Some(ref_intr) = intrinsics[reference] else {
        bail!("reference camera {reference} has no intrinsics");
    };
    let input = session.require_input()?.clone();

    let mut pairwise: [Option<PairwisePose>; NUM_CAMERAS] = [None; NUM_CAMERAS];
    let mut skipped = Vec::new();
    for cam in (0..NUM_CAMERAS).filter(|&c| c != reference) {
        let Some(intr) = intrinsics[cam] else {
            skipped.push(SkipReason::PairUncalibrated { camera: cam });
            continue;
        };
        let common: Vec<_> = input
            .store
            .common_views(reference, cam)
            .into_iter()
            .map(|(_, a, b)| (a, b))
            .collect();
        if common.len() < min_frames {
            skipped.push(SkipReason::Pair {
                camera: cam,
                frames: common.len(),
                required: min_frames,
            });
            continue;
        }
        match calibrate_stereo_extrinsics(&ref_intr, &intr, &common, &solver.stereo) {
            Ok(est) => {
                let pose = PairwisePose {
                    rvec: est.b_se3_a.rotation.scaled_axis(),
                    tvec: est.b_se3_a.translation.vector,
                    frames: common.len(),
                    rms: est.stats.rms,
                };
                info!(
                    camera = cam,
                    frames = pose.frames,
                    baseline_mm = pose.tvec.norm(),
                    rms_px = pose.rms,
                    "pairwise pose solved"
                );
                pairwise[cam] = Some(pose);
            }
            Err(e) => skipped.push(SkipReason::PairFailed {
                camera: cam,
                error: format!("{e:#}"),
            }),
        }
    }

    for reason in skipped {
        warn!(?reason, "pairwise pose defaults to identity");
        session.state.skip(reason);
    }
    let solved = pairwise.iter().flatten().count();
    session.state.pairwise = Some(pairwise);
    session.log_success_with_notes(
        "pairwise_poses",
        format!("{solved} of {} cameras", NUM_CAMERAS - 1),
    );
    Ok(())
}

/// Build centroid-frame poses from the pairwise poses and report
/// inter-camera spacing.
///
/// # Errors
///
/// Pairwise poses not computed.
pub fn step_reference_frame(session: &mut CalibrationSession<QuadRigProblem>) -> Result<()> {
    let pairwise = session
        .state
        .pairwise
        .ok_or_else(|| anyhow::anyhow!("pairwise poses not computed; run step_pairwise_poses first"))?;
    let layout = &session.config.layout;
    let reference = layout.reference_camera;

    let poses = centroid_poses(reference, &pairwise);
    let located: [bool; NUM_CAMERAS] = std::array::from_fn(|cam| cam == reference || pairwise[cam].is_some());
    let spacing = spacing_report(&poses, &located, layout.spacing_range_mm);

    for d in &spacing.distances {
        debug!(pair = %d.pair.name(), distance_mm = d.distance_mm, "camera distance");
    }
    if spacing.suspicious {
        warn!(
            mean_mm = spacing.mean_spacing_mm,
            min_mm = layout.spacing_range_mm.0,
            max_mm = layout.spacing_range_mm.1,
            "camera spacing outside plausible range"
        );
    } else {
        info!(mean_mm = spacing.mean_spacing_mm, "camera spacing");
    }

    session.state.initial_poses = Some(poses);
    session.state.poses = Some(poses);
    session.state.spacing = Some(spacing);
    session.state.refine = None;
    session.log_success("reference_frame");
    Ok(())
}

/// Jointly refine the four camera poses over frames seen by every camera.
///
/// Skipped with a warning (poses unchanged) when too few complete frames
/// exist.
///
/// # Errors
///
/// Intrinsics or poses not computed.
pub fn step_bundle_refine(
    session: &mut CalibrationSession<QuadRigProblem>,
    opts: Option<RefineOptions>,
) -> Result<()> {
    let intrinsics = require_intrinsics(session)?;
    let mut poses = require_poses(session)?;
    let opts = opts.unwrap_or_default();
    let cfg = opts.refine.unwrap_or(session.config.refine);
    let min_frames = opts.min_frames.unwrap_or(session.config.solver.min_refine_frames);
    let input = session.require_input()?;

    let complete = input.store.complete_frames();
    if complete.len() < min_frames {
        let reason = SkipReason::BundleRefine {
            complete_frames: complete.len(),
            required: min_frames,
        };
        warn!(?reason, "bundle refinement skipped");
        session.state.skip(reason);
        session.state.refine = None;
        session.log_success_with_notes("bundle_refine", "skipped");
        return Ok(());
    }

    let frames: Vec<RigRefineFrame> = complete
        .iter()
        .filter_map(|&idx| {
            let frame = &input.store.frames()[idx];
            let views = std::array::from_fn(|cam| frame.view(cam));
            match RigRefineFrame::from_views(views, &intrinsics, &poses) {
                Ok(f) => Some(f),
                Err(e) => {
                    debug!(frame = idx, error = %e, "frame dropped from refinement");
                    None
                }
            }
        })
        .collect();

    let report = refine_rig_poses(&frames, &intrinsics, &mut poses, &cfg);
    info!(
        frames = frames.len(),
        before_px = report.initial_error,
        after_px = report.final_error,
        steps = report.accepted_steps,
        "bundle refinement"
    );
    let notes = format!("{:.4} -> {:.4} px", report.initial_error, report.final_error);
    session.state.poses = Some(poses);
    session.state.refine = Some(report);
    session.log_success_with_notes("bundle_refine", notes);
    Ok(())
}

/// Build rectification maps for every configured pair.
///
/// # Errors
///
/// Intrinsics or poses not computed.
pub fn step_rectification(session: &mut CalibrationSession<QuadRigProblem>) -> Result<()> {
    let intrinsics = require_intrinsics(session)?;
    let poses = require_poses(session)?;
    let pairs = session.config.layout.rect_pairs.clone();

    let results: Vec<_> = pairs
        .par_iter()
        .map(|&pair| {
            let (Some(a), Some(b)) = (&intrinsics[pair.first], &intrinsics[pair.second]) else {
                return (pair, Err("camera without intrinsics".to_string()));
            };
            let (r, t) = relative_pose(&poses[pair.first], &poses[pair.second]);
            (pair, stereo_rectify(a, b, &r, &t).map_err(|e| e.to_string()))
        })
        .collect();

    session.state.rectifications.clear();
    session.state.rectified_pairs.clear();
    for (pair, result) in results {
        match result {
            Ok(rect) => {
                info!(
                    pair = %pair.name(),
                    axis = ?rect.axis,
                    baseline_mm = rect.baseline(),
                    roi1 = ?rect.first.roi.to_array(),
                    roi2 = ?rect.second.roi.to_array(),
                    "pair rectified"
                );
                session.state.rectified_pairs.push(pair);
                session.state.rectifications.push((pair, rect));
            }
            Err(error) => {
                warn!(pair = %pair.name(), %error, "pair not rectified");
                session.state.skip(SkipReason::Rectification {
                    pair: pair.name(),
                    error,
                });
            }
        }
    }
    let notes = format!("{} of {} pairs", session.state.rectified_pairs.len(), pairs.len());
    session.log_success_with_notes("rectification", notes);
    Ok(())
}

/// Rectify a held-out frame per pair and score residual misalignment.
///
/// Missing images or rectifications fail the affected pairs; the step
/// itself only errors on missing prerequisites.
///
/// # Errors
///
/// Poses not computed, or rectification maps could not be rebuilt.
pub fn step_validate(
    session: &mut CalibrationSession<QuadRigProblem>,
    opts: Option<ValidateOptions>,
) -> Result<()> {
    require_poses(session)?;
    if session.state.rectifications.is_empty() && !session.state.rectified_pairs.is_empty() {
        // Restored sessions do not carry the maps.
        step_rectification(session)?;
    }
    let opts = opts.unwrap_or_default();
    let images = match opts.images {
        Some(images) => Some(images),
        None => match load_validation_images(session.require_input()?) {
            Ok(images) => images,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "validation images unavailable");
                None
            }
        },
    };

    let pairs = session.config.layout.rect_pairs.clone();
    let cfg = session.config.validation;
    let mut results = Vec::with_capacity(pairs.len());
    let mut skipped = Vec::new();
    for pair in pairs {
        let result = match (&images, session.state.rectification(pair)) {
            (Some(images), Some(rect)) => validate_pair(rect, &images[pair.first], &images[pair.second], &cfg),
            (None, _) => {
                skipped.push(SkipReason::Validation {
                    pair: pair.name(),
                    reason: "missing test images".into(),
                });
                PairValidation::failed()
            }
            (_, None) => {
                skipped.push(SkipReason::Validation {
                    pair: pair.name(),
                    reason: "no rectification".into(),
                });
                PairValidation::failed()
            }
        };
        if result.quality_good {
            info!(
                pair = %pair.name(),
                matches = result.num_matches,
                mean_px = result.mean_vertical_disparity,
                max_px = result.max_vertical_disparity,
                "pair validated"
            );
        } else {
            warn!(
                pair = %pair.name(),
                matches = result.num_matches,
                mean_px = result.mean_vertical_disparity,
                std_px = result.std_vertical_disparity,
                max_px = result.max_vertical_disparity,
                "pair failed validation"
            );
        }
        results.push((pair, result));
    }
    for reason in skipped {
        session.state.skip(reason);
    }

    let report = ValidationReport::new(current_timestamp(), results);
    let verdict = if report.is_good() { "good" } else { "needs improvement" };
    info!(verdict, "rectification validation");
    session.state.validation = Some(report);
    session.log_success_with_notes("validate", verdict);
    Ok(())
}

/// Assemble the session output from the computed state.
///
/// # Errors
///
/// Intrinsics or poses not computed.
pub fn step_finalize(session: &mut CalibrationSession<QuadRigProblem>) -> Result<()> {
    let intrinsics = require_intrinsics(session)?;
    let poses = require_poses(session)?;
    let input = session.require_input()?;
    let output = QuadRigOutput {
        timestamp: current_timestamp(),
        frames_captured: input.store.len(),
        use_highres_intrinsics: session.state.intrinsics_source == IntrinsicsSource::HighRes,
        intrinsics,
        poses,
        refine: session.state.refine.clone(),
        validation: session.state.validation.clone(),
    };
    session.set_output(output);
    session.log_success("finalize");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Run every step on the session's input.
///
/// # Errors
///
/// Any step error; fewer stored frames than `capture.min_frames` aborts
/// before the first solver step.
pub fn run_calibration(session: &mut CalibrationSession<QuadRigProblem>) -> Result<()> {
    run_calibration_with_images(session, None)
}

/// [`run_calibration`] validating on in-memory images.
///
/// # Errors
///
/// See [`run_calibration`].
pub fn run_calibration_with_images(
    session: &mut CalibrationSession<QuadRigProblem>,
    images: Option<[GrayImage; NUM_CAMERAS]>,
) -> Result<()> {
    if let Err(e) = session.validate() {
        session.log_failure("validate_input", format!("{e:#}"));
        return Err(e);
    }
    step_intrinsics(session, None)?;
    step_pairwise_poses(session, None)?;
    step_reference_frame(session)?;
    step_bundle_refine(session, None)?;
    step_rectification(session)?;
    step_validate(session, Some(ValidateOptions { images }))?;
    step_finalize(session)
}

/// Capture from the camera and calibrate.
///
/// High-resolution intrinsics are used when enabled and available;
/// failure there falls back to the working resolution with a warning.
///
/// # Errors
///
/// Camera failures during capture, too few accepted frames, or any step
/// error.
pub fn run_live_calibration(
    camera: &SharedCamera,
    settings: &dyn SettingsProvider,
    config: QuadRigConfig,
) -> Result<CalibrationSession<QuadRigProblem>> {
    let mut session = CalibrationSession::<QuadRigProblem>::with_description("live capture");
    session.set_config(config)?;
    let cfg = session.config.clone();

    let highres = if cfg.highres.enabled {
        match load_or_capture(
            camera,
            settings,
            &cfg.target,
            &cfg.detector,
            &cfg.brightness,
            &cfg.capture,
            &cfg.highres,
            &cfg.solver.intrinsics,
        ) {
            Ok(intrinsics) => Some(intrinsics),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "falling back to working-resolution intrinsics");
                session.log_failure("highres_intrinsics", format!("{e:#}"));
                None
            }
        }
    } else {
        None
    };

    let outcome = match capture_calibration_frames(
        camera,
        settings,
        &cfg.target,
        &cfg.detector,
        &cfg.brightness,
        &cfg.capture,
    ) {
        Ok(outcome) => outcome,
        Err(e) => {
            session.log_failure("capture", e.to_string());
            return Err(e).context("capturing calibration frames");
        }
    };
    session.log_success_with_notes(
        "capture",
        format!("{} frames in {} attempts", outcome.store.len(), outcome.attempts),
    );

    let mut input = QuadRigInput::new(outcome.store, cfg.capture.camera_size());
    input.highres_intrinsics = highres;
    input.validation_frames = outcome.saved_frames.last().cloned();
    session.set_input(input)?;
    run_calibration_with_images(&mut session, outcome.held_out)?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadcal_core::synthetic::rig::SyntheticRig;
    use quadcal_core::{matrix_to_rvec, rvec_to_matrix};

    fn pairwise_from(rig: &SyntheticRig) -> [Option<PairwisePose>; NUM_CAMERAS] {
        std::array::from_fn(|cam| {
            (cam != 0).then(|| {
                let rel = rig.relative_to_reference(cam);
                PairwisePose {
                    rvec: rel.rotation.scaled_axis(),
                    tvec: rel.translation.vector,
                    frames: 20,
                    rms: 0.0,
                }
            })
        })
    }

    #[test]
    fn centroid_poses_recover_ground_truth() {
        let rig = SyntheticRig::default();
        let poses = centroid_poses(0, &pairwise_from(&rig));
        for (got, truth) in poses.iter().zip(&rig.poses) {
            assert!((got.tvec - truth.tvec).norm() < 1e-9);
            assert!((got.rvec - truth.rvec).norm() < 1e-12);
        }
    }

    #[test]
    fn centroid_is_zero_even_with_missing_camera() {
        let rig = SyntheticRig::default();
        let mut pairwise = pairwise_from(&rig);
        pairwise[2] = None;
        let poses = centroid_poses(0, &pairwise);
        let mean: Vec3 = poses.iter().map(|p| p.tvec).sum::<Vec3>() / NUM_CAMERAS as Real;
        assert!(mean.norm() < 1e-12);
        assert_eq!(poses[2].rvec, Vec3::zeros());
        // A missing camera sits at the reference origin.
        assert!((poses[2].tvec - poses[0].tvec).norm() < 1e-12);
    }

    #[test]
    fn relative_pose_matches_rig_geometry() {
        let rig = SyntheticRig::default();
        let (r, t) = relative_pose(&rig.poses[0], &rig.poses[3]);
        let truth = rig.relative_to_reference(3);
        assert!((r - truth.rotation.to_rotation_matrix().into_inner()).norm() < 1e-12);
        assert!((t - truth.translation.vector).norm() < 1e-9);
        assert!((matrix_to_rvec(&r) - truth.rotation.scaled_axis()).norm() < 1e-9);
        assert!((rvec_to_matrix(&rig.poses[0].rvec) - Mat3::identity()).norm() < 1e-15);
    }

    #[test]
    fn spacing_flags_implausible_rigs() {
        let rig = SyntheticRig::default();
        let all = [true; NUM_CAMERAS];
        let report = spacing_report(&rig.poses, &all, (20.0, 200.0));
        assert_eq!(report.distances.len(), 6);
        let expected = (4.0 * 50.0 + 2.0 * 50.0 * 2f64.sqrt()) / 6.0;
        assert!((report.mean_spacing_mm - expected).abs() < 0.1);
        assert!(!report.suspicious);

        let tight = spacing_report(&rig.poses, &all, (80.0, 200.0));
        assert!(tight.suspicious);

        let partial = spacing_report(&rig.poses, &[true, false, false, true], (20.0, 200.0));
        assert_eq!(partial.distances.len(), 1);
        assert_eq!(partial.distances[0].pair, CameraPair::new(0, 3));
    }
}
