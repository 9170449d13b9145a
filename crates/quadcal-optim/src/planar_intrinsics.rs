//! Single-camera calibration: intrinsics, distortion and per-view poses.
//!
//! Linear initialization (iterative Zhang + distortion fit, then one
//! homography pose per view) followed by a joint Levenberg-Marquardt
//! refinement of every reprojection residual.

use anyhow::{ensure, Context, Result};
use nalgebra::{DMatrix, DVector};
use quadcal_core::{
    CameraIntrinsics, CorrespondenceView, ImageSize, Iso3, Real, ReprojectionStats,
};
use quadcal_linear::{
    estimate_intrinsics_iterative, estimate_view_pose, DistortionFitOptions,
    IterativeIntrinsicsOptions,
};
use serde::{Deserialize, Serialize};

use crate::params::{
    intrinsics_from_params, intrinsics_to_params, pose_from_params, pose_to_params,
    INTRINSICS_DIM, POSE_DIM,
};
use crate::reprojection::{push_view_residuals, view_point_errors};
use crate::traits::central_difference_jacobian;
use crate::{LmBackend, NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanarIntrinsicsOptions {
    /// Keep `k3 = 0` during refinement.
    pub fix_k3: bool,
    /// Keep `p1 = p2 = 0` during refinement.
    pub fix_tangential: bool,
    pub max_iters: usize,
    /// Undistortion iterations stored on the resulting model.
    pub undistort_iters: u32,
}

impl Default for PlanarIntrinsicsOptions {
    fn default() -> Self {
        Self {
            fix_k3: false,
            fix_tangential: false,
            max_iters: 100,
            undistort_iters: 8,
        }
    }
}

impl PlanarIntrinsicsOptions {
    /// Indices into the 9-vector of intrinsics that are optimized.
    fn free_intrinsics(&self) -> Vec<usize> {
        (0..INTRINSICS_DIM)
            .filter(|&i| !(self.fix_tangential && (i == 6 || i == 7)) && !(self.fix_k3 && i == 8))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct PlanarIntrinsicsEstimate {
    pub intrinsics: CameraIntrinsics,
    /// Target-to-camera pose per input view.
    pub poses: Vec<Iso3>,
    pub stats: ReprojectionStats,
    pub report: SolveReport,
}

struct PlanarIntrinsicsProblem<'a> {
    views: &'a [CorrespondenceView],
    base: [Real; INTRINSICS_DIM],
    free: Vec<usize>,
    iters: u32,
}

impl PlanarIntrinsicsProblem<'_> {
    fn intrinsics_block(&self, x: &[Real]) -> [Real; INTRINSICS_DIM] {
        let mut p = self.base;
        for (slot, &idx) in self.free.iter().enumerate() {
            p[idx] = x[slot];
        }
        p
    }

    fn pose_offset(&self, view: usize) -> usize {
        self.free.len() + POSE_DIM * view
    }

    fn view_residuals(&self, intr: &[Real], pose: &[Real], view: &CorrespondenceView) -> DVector<Real> {
        let (k, d) = intrinsics_from_params(&self.intrinsics_block(intr), self.iters);
        let mut r = Vec::with_capacity(2 * view.len());
        push_view_residuals(&k, &d, &pose_from_params(pose), view, &mut r);
        DVector::from_vec(r)
    }

    fn pack(&self, poses: &[Iso3]) -> DVector<Real> {
        let mut x = DVector::zeros(self.num_params());
        for (slot, &idx) in self.free.iter().enumerate() {
            x[slot] = self.base[idx];
        }
        for (v, pose) in poses.iter().enumerate() {
            let off = self.pose_offset(v);
            x.rows_mut(off, POSE_DIM).copy_from_slice(&pose_to_params(pose));
        }
        x
    }
}

impl NllsProblem for PlanarIntrinsicsProblem<'_> {
    fn num_params(&self) -> usize {
        self.free.len() + POSE_DIM * self.views.len()
    }

    fn num_residuals(&self) -> usize {
        self.views.iter().map(|v| 2 * v.len()).sum()
    }

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
        let nf = self.free.len();
        let mut out = Vec::with_capacity(self.num_residuals());
        for (v, view) in self.views.iter().enumerate() {
            let off = self.pose_offset(v);
            let r = self.view_residuals(&x.as_slice()[..nf], &x.as_slice()[off..off + POSE_DIM], view);
            out.extend(r.iter());
        }
        DVector::from_vec(out)
    }

    /// Block-sparse: each view depends only on the shared intrinsics and
    /// its own pose, so differentiate per view instead of globally.
    fn jacobian(&self, x: &DVector<Real>) -> DMatrix<Real> {
        let nf = self.free.len();
        let mut jac = DMatrix::zeros(self.num_residuals(), self.num_params());
        let mut row = 0;
        for (v, view) in self.views.iter().enumerate() {
            let off = self.pose_offset(v);
            let mut local = DVector::zeros(nf + POSE_DIM);
            local.rows_mut(0, nf).copy_from(&x.rows(0, nf));
            local.rows_mut(nf, POSE_DIM).copy_from(&x.rows(off, POSE_DIM));

            let rows = 2 * view.len();
            let block = central_difference_jacobian(&local, rows, |p| {
                self.view_residuals(&p.as_slice()[..nf], &p.as_slice()[nf..], view)
            });
            jac.view_mut((row, 0), (rows, nf)).copy_from(&block.columns(0, nf));
            jac.view_mut((row, off), (rows, POSE_DIM))
                .copy_from(&block.columns(nf, POSE_DIM));
            row += rows;
        }
        jac
    }
}

/// Calibrate one camera from its planar views.
///
/// Needs at least three views; callers enforce their own, larger minimum.
pub fn calibrate_camera(
    views: &[CorrespondenceView],
    image_size: ImageSize,
    opts: &PlanarIntrinsicsOptions,
) -> Result<PlanarIntrinsicsEstimate> {
    ensure!(views.len() >= 3, "need at least 3 views, got {}", views.len());
    for (i, v) in views.iter().enumerate() {
        ensure!(v.len() >= 6, "view {i} has only {} points", v.len());
    }

    let linear_views: Vec<_> = views
        .iter()
        .map(|v| (v.planar_points(), v.points_2d.clone()))
        .collect();
    let init = estimate_intrinsics_iterative(
        &linear_views,
        IterativeIntrinsicsOptions {
            distortion_opts: DistortionFitOptions {
                fix_tangential: opts.fix_tangential,
                fix_k3: true,
                iters: opts.undistort_iters,
            },
            ..Default::default()
        },
    )
    .context("linear intrinsics initialization failed")?;

    let seed = CameraIntrinsics {
        k: init.intrinsics,
        dist: init.distortion,
        reproj_error: 0.0,
        image_size,
    };
    let poses0 = views
        .iter()
        .enumerate()
        .map(|(i, v)| estimate_view_pose(&seed, v).with_context(|| format!("initial pose of view {i}")))
        .collect::<Result<Vec<_>>>()?;

    let problem = PlanarIntrinsicsProblem {
        views,
        base: intrinsics_to_params(&seed.k, &seed.dist),
        free: opts.free_intrinsics(),
        iters: opts.undistort_iters,
    };
    let x0 = problem.pack(&poses0);
    let solve_opts = SolveOptions {
        max_iters: opts.max_iters,
        ..Default::default()
    };
    let (x, report) = LmBackend.solve(&problem, x0, &solve_opts);

    let nf = problem.free.len();
    let (k, dist) = intrinsics_from_params(&problem.intrinsics_block(&x.as_slice()[..nf]), opts.undistort_iters);
    let poses: Vec<Iso3> = (0..views.len())
        .map(|v| {
            let off = problem.pose_offset(v);
            pose_from_params(&x.as_slice()[off..off + POSE_DIM])
        })
        .collect();

    let errors: Vec<Real> = views
        .iter()
        .zip(&poses)
        .flat_map(|(v, p)| view_point_errors(&k, &dist, p, v))
        .collect();
    let stats = ReprojectionStats::from_errors(&errors);
    ensure!(
        k.fx.is_finite() && k.fy.is_finite() && k.fx > 0.0 && k.fy > 0.0,
        "intrinsics refinement diverged (fx={}, fy={})",
        k.fx,
        k.fy
    );

    tracing::debug!(
        views = views.len(),
        mean_px = stats.mean,
        rms_px = stats.rms,
        converged = report.converged,
        "camera calibrated"
    );

    Ok(PlanarIntrinsicsEstimate {
        intrinsics: CameraIntrinsics {
            k,
            dist,
            reproj_error: stats.mean,
            image_size,
        },
        poses,
        stats,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadcal_core::synthetic::{noise::UniformPixelNoise, rig::SyntheticRig};

    fn views_for(rig: &SyntheticRig, cam: usize, n: usize, noise: UniformPixelNoise) -> Vec<CorrespondenceView> {
        rig.generate_store(n, noise)
            .unwrap()
            .camera_views(cam)
            .into_iter()
            .map(|(_, v)| v)
            .collect()
    }

    #[test]
    fn recovers_intrinsics_from_clean_views() {
        let rig = SyntheticRig::default();
        let views = views_for(&rig, 0, 12, UniformPixelNoise::none());
        let est = calibrate_camera(&views, rig.intrinsics[0].image_size, &Default::default()).unwrap();

        let gt = &rig.intrinsics[0];
        assert!((est.intrinsics.k.fx - gt.k.fx).abs() < 0.5, "fx={}", est.intrinsics.k.fx);
        assert!((est.intrinsics.k.fy - gt.k.fy).abs() < 0.5);
        assert!((est.intrinsics.k.cx - gt.k.cx).abs() < 0.5);
        assert!((est.intrinsics.k.cy - gt.k.cy).abs() < 0.5);
        assert!((est.intrinsics.dist.k1 - gt.dist.k1).abs() < 0.01);
        assert!(est.stats.mean < 1e-3, "mean={}", est.stats.mean);
        assert_eq!(est.poses.len(), 12);
    }

    #[test]
    fn noisy_views_keep_subpixel_residual() {
        let rig = SyntheticRig::default();
        let noise = UniformPixelNoise {
            seed: 11,
            max_abs_px: 0.3,
        };
        let views = views_for(&rig, 3, 15, noise);
        let est = calibrate_camera(&views, rig.intrinsics[3].image_size, &Default::default()).unwrap();
        assert!(est.intrinsics.reproj_error < 0.3);
        assert!((est.intrinsics.k.fx - rig.intrinsics[3].k.fx).abs() / rig.intrinsics[3].k.fx < 0.02);
    }

    #[test]
    fn fixed_coefficients_stay_zero() {
        let rig = SyntheticRig::default();
        let views = views_for(&rig, 1, 10, UniformPixelNoise::none());
        let opts = PlanarIntrinsicsOptions {
            fix_k3: true,
            fix_tangential: true,
            ..Default::default()
        };
        let est = calibrate_camera(&views, rig.intrinsics[1].image_size, &opts).unwrap();
        assert_eq!(est.intrinsics.dist.k3, 0.0);
        assert_eq!(est.intrinsics.dist.p1, 0.0);
        assert_eq!(est.intrinsics.dist.p2, 0.0);
    }

    #[test]
    fn too_few_views_is_an_error() {
        let rig = SyntheticRig::default();
        let views = views_for(&rig, 0, 2, UniformPixelNoise::none());
        assert!(calibrate_camera(&views, rig.intrinsics[0].image_size, &Default::default()).is_err());
    }
}
