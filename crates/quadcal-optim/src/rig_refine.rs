//! Coordinate-descent refinement of the four camera poses.
//!
//! A deliberately small local search: for every camera and every
//! rotation-vector / position component, estimate the derivative of the
//! total reprojection error by central differences, take one gradient step
//! and keep it only if the error strictly drops. A pass with no accepted
//! step shrinks the learning rate. The error therefore never increases.
//!
//! Target poses are held fixed in the rig frame; only camera poses move.

use anyhow::{ensure, Context, Result};
use quadcal_core::{
    CameraIntrinsics, CameraPose, CorrespondenceView, Iso3, Real, NUM_CAMERAS,
};
use quadcal_linear::{average_isometries, estimate_view_pose};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::reprojection::view_point_errors;

/// Step schedule of the refiner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    pub passes: usize,
    pub learning_rate: Real,
    /// Multiplier on the learning rate for position components (mm).
    pub translation_scale: Real,
    /// Learning rate factor after a pass without improvement.
    pub decay: Real,
    /// Finite-difference half step, scaled like the learning rate.
    pub fd_step: Real,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            passes: 20,
            learning_rate: 1e-3,
            translation_scale: 10.0,
            decay: 0.5,
            fd_step: 1e-4,
        }
    }
}

/// One synchronized capture with the target pose expressed in the rig frame.
#[derive(Debug, Clone)]
pub struct RigRefineFrame {
    pub rig_se3_target: Iso3,
    pub views: [Option<CorrespondenceView>; NUM_CAMERAS],
}

impl RigRefineFrame {
    /// Build a frame by averaging the target pose implied by every camera
    /// that has both a view and intrinsics.
    pub fn from_views(
        views: [Option<CorrespondenceView>; NUM_CAMERAS],
        intrinsics: &[Option<CameraIntrinsics>; NUM_CAMERAS],
        poses: &[CameraPose; NUM_CAMERAS],
    ) -> Result<Self> {
        let mut estimates = Vec::new();
        for cam in 0..NUM_CAMERAS {
            if let (Some(view), Some(intr)) = (&views[cam], &intrinsics[cam]) {
                let cam_se3_target = estimate_view_pose(intr, view)
                    .with_context(|| format!("target pose from camera {cam}"))?;
                estimates.push(poses[cam].cam_se3_rig().inverse() * cam_se3_target);
            }
        }
        ensure!(!estimates.is_empty(), "frame has no calibrated camera views");
        Ok(Self {
            rig_se3_target: average_isometries(&estimates)?,
            views,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineReport {
    pub initial_error: Real,
    pub final_error: Real,
    /// Total error after each pass.
    pub history: Vec<Real>,
    pub accepted_steps: usize,
    pub final_learning_rate: Real,
}

/// Point-weighted mean reprojection error (pixels) over every frame and
/// every camera that has intrinsics.
pub fn total_reprojection_error(
    frames: &[RigRefineFrame],
    intrinsics: &[Option<CameraIntrinsics>; NUM_CAMERAS],
    poses: &[CameraPose; NUM_CAMERAS],
) -> Real {
    let cam_se3_rig: Vec<Iso3> = poses.iter().map(CameraPose::cam_se3_rig).collect();
    let per_frame: Vec<(Real, usize)> = frames
        .par_iter()
        .map(|frame| {
            let mut sum = 0.0;
            let mut count = 0;
            for cam in 0..NUM_CAMERAS {
                if let (Some(view), Some(intr)) = (&frame.views[cam], &intrinsics[cam]) {
                    let pose = cam_se3_rig[cam] * frame.rig_se3_target;
                    let errs = view_point_errors(&intr.k, &intr.dist, &pose, view);
                    sum += errs.iter().sum::<Real>();
                    count += errs.len();
                }
            }
            (sum, count)
        })
        .collect();

    // Sequential reduction keeps the result independent of thread count.
    let (sum, count) = per_frame
        .iter()
        .fold((0.0, 0), |(s, c), (fs, fc)| (s + fs, c + fc));
    if count == 0 {
        Real::INFINITY
    } else {
        sum / count as Real
    }
}

fn component(pose: &mut CameraPose, idx: usize) -> &mut Real {
    if idx < 3 {
        &mut pose.rvec[idx]
    } else {
        &mut pose.tvec[idx - 3]
    }
}

/// Refine `poses` in place and report the error trajectory.
///
/// Only cameras with intrinsics are perturbed.
pub fn refine_rig_poses(
    frames: &[RigRefineFrame],
    intrinsics: &[Option<CameraIntrinsics>; NUM_CAMERAS],
    poses: &mut [CameraPose; NUM_CAMERAS],
    cfg: &RefineConfig,
) -> RefineReport {
    let initial_error = total_reprojection_error(frames, intrinsics, poses);
    let mut best = initial_error;
    let mut lr = cfg.learning_rate;
    let mut history = Vec::with_capacity(cfg.passes);
    let mut accepted_steps = 0;

    for pass in 0..cfg.passes {
        let mut improved = false;
        for cam in (0..NUM_CAMERAS).filter(|&c| intrinsics[c].is_some()) {
            for idx in 0..6 {
                let scale = if idx < 3 { 1.0 } else { cfg.translation_scale };
                let step = lr * scale;
                let h = cfg.fd_step * scale;
                let original = *component(&mut poses[cam], idx);

                *component(&mut poses[cam], idx) = original + h;
                let e_plus = total_reprojection_error(frames, intrinsics, poses);
                *component(&mut poses[cam], idx) = original - h;
                let e_minus = total_reprojection_error(frames, intrinsics, poses);
                let gradient = (e_plus - e_minus) / (2.0 * h);

                *component(&mut poses[cam], idx) = original - step * gradient;
                let candidate = total_reprojection_error(frames, intrinsics, poses);
                if candidate < best {
                    best = candidate;
                    improved = true;
                    accepted_steps += 1;
                } else {
                    *component(&mut poses[cam], idx) = original;
                }
            }
        }
        if !improved {
            lr *= cfg.decay;
        }
        history.push(best);
        tracing::debug!(pass, error = best, learning_rate = lr, "refine pass");
    }

    RefineReport {
        initial_error,
        final_error: best,
        history,
        accepted_steps,
        final_learning_rate: lr,
    }
}
