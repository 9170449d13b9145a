//! Relative pose of two calibrated cameras from shared target views.
//!
//! Intrinsics of both cameras stay fixed. Parameters are the relative pose
//! `T_B_A` followed by one target pose `T_A_target` per shared view.

use anyhow::{ensure, Context, Result};
use nalgebra::{DMatrix, DVector};
use quadcal_core::{CameraIntrinsics, CorrespondenceView, Iso3, Real, ReprojectionStats};
use quadcal_linear::{average_isometries, estimate_view_pose};
use serde::{Deserialize, Serialize};

use crate::params::{pose_from_params, pose_to_params, POSE_DIM};
use crate::reprojection::{push_view_residuals, view_point_errors};
use crate::traits::central_difference_jacobian;
use crate::{LmBackend, NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoOptions {
    pub max_iters: usize,
    /// Relative cost / parameter tolerance.
    pub tol: Real,
}

impl Default for StereoOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            tol: 1e-5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StereoEstimate {
    /// Maps camera A coordinates into camera B: `X_B = R · X_A + T`.
    pub b_se3_a: Iso3,
    pub stats: ReprojectionStats,
    pub report: SolveReport,
}

struct StereoProblem<'a> {
    a: &'a CameraIntrinsics,
    b: &'a CameraIntrinsics,
    views: &'a [(CorrespondenceView, CorrespondenceView)],
}

impl StereoProblem<'_> {
    fn frame_offset(&self, i: usize) -> usize {
        POSE_DIM * (i + 1)
    }

    /// Residuals of one shared view: camera A rows then camera B rows.
    fn frame_residuals(&self, rel: &[Real], target: &[Real], i: usize) -> DVector<Real> {
        let (va, vb) = &self.views[i];
        let a_se3_t = pose_from_params(target);
        let b_se3_t = pose_from_params(rel) * a_se3_t;
        let mut r = Vec::with_capacity(2 * (va.len() + vb.len()));
        push_view_residuals(&self.a.k, &self.a.dist, &a_se3_t, va, &mut r);
        push_view_residuals(&self.b.k, &self.b.dist, &b_se3_t, vb, &mut r);
        DVector::from_vec(r)
    }

    fn frame_rows(&self, i: usize) -> usize {
        2 * (self.views[i].0.len() + self.views[i].1.len())
    }
}

impl NllsProblem for StereoProblem<'_> {
    fn num_params(&self) -> usize {
        POSE_DIM * (self.views.len() + 1)
    }

    fn num_residuals(&self) -> usize {
        (0..self.views.len()).map(|i| self.frame_rows(i)).sum()
    }

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
        let xs = x.as_slice();
        let mut out = Vec::with_capacity(self.num_residuals());
        for i in 0..self.views.len() {
            let off = self.frame_offset(i);
            out.extend(self.frame_residuals(&xs[..POSE_DIM], &xs[off..off + POSE_DIM], i).iter());
        }
        DVector::from_vec(out)
    }

    fn jacobian(&self, x: &DVector<Real>) -> DMatrix<Real> {
        let mut jac = DMatrix::zeros(self.num_residuals(), self.num_params());
        let mut row = 0;
        for i in 0..self.views.len() {
            let off = self.frame_offset(i);
            let mut local = DVector::zeros(2 * POSE_DIM);
            local.rows_mut(0, POSE_DIM).copy_from(&x.rows(0, POSE_DIM));
            local.rows_mut(POSE_DIM, POSE_DIM).copy_from(&x.rows(off, POSE_DIM));

            let rows = self.frame_rows(i);
            let block = central_difference_jacobian(&local, rows, |p| {
                let ps = p.as_slice();
                self.frame_residuals(&ps[..POSE_DIM], &ps[POSE_DIM..], i)
            });
            jac.view_mut((row, 0), (rows, POSE_DIM))
                .copy_from(&block.columns(0, POSE_DIM));
            jac.view_mut((row, off), (rows, POSE_DIM))
                .copy_from(&block.columns(POSE_DIM, POSE_DIM));
            row += rows;
        }
        jac
    }
}

/// Solve the pose of camera B relative to camera A with both intrinsics
/// held fixed.
pub fn calibrate_stereo_extrinsics(
    a: &CameraIntrinsics,
    b: &CameraIntrinsics,
    views: &[(CorrespondenceView, CorrespondenceView)],
    opts: &StereoOptions,
) -> Result<StereoEstimate> {
    ensure!(!views.is_empty(), "no shared views");

    let mut targets = Vec::with_capacity(views.len());
    let mut rel_guesses = Vec::with_capacity(views.len());
    for (i, (va, vb)) in views.iter().enumerate() {
        let a_se3_t = estimate_view_pose(a, va).with_context(|| format!("view {i}, camera A"))?;
        let b_se3_t = estimate_view_pose(b, vb).with_context(|| format!("view {i}, camera B"))?;
        rel_guesses.push(b_se3_t * a_se3_t.inverse());
        targets.push(a_se3_t);
    }
    let rel0 = average_isometries(&rel_guesses)?;

    let problem = StereoProblem { a, b, views };
    let mut x0 = DVector::zeros(problem.num_params());
    x0.rows_mut(0, POSE_DIM).copy_from_slice(&pose_to_params(&rel0));
    for (i, t) in targets.iter().enumerate() {
        x0.rows_mut(problem.frame_offset(i), POSE_DIM)
            .copy_from_slice(&pose_to_params(t));
    }

    let solve_opts = SolveOptions {
        max_iters: opts.max_iters,
        ftol: opts.tol,
        xtol: opts.tol,
        gtol: opts.tol,
    };
    let (x, report) = LmBackend.solve(&problem, x0, &solve_opts);
    let xs = x.as_slice();
    let b_se3_a = pose_from_params(&xs[..POSE_DIM]);

    let mut errors = Vec::new();
    for (i, (va, vb)) in views.iter().enumerate() {
        let off = problem.frame_offset(i);
        let a_se3_t = pose_from_params(&xs[off..off + POSE_DIM]);
        errors.extend(view_point_errors(&a.k, &a.dist, &a_se3_t, va));
        errors.extend(view_point_errors(&b.k, &b.dist, &(b_se3_a * a_se3_t), vb));
    }
    let stats = ReprojectionStats::from_errors(&errors);

    Ok(StereoEstimate {
        b_se3_a,
        stats,
        report,
    })
}
