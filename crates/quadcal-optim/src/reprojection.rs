//! Reprojection residuals and error summaries shared by all problems.

use quadcal_core::{
    BrownConrady5, CorrespondenceView, DistortionModel, FxFyCxCySkew, Iso3, Pt2, Real, Vec2,
};

/// Project a camera-frame point to pixels; points behind the camera are
/// pushed to a large but finite position so solvers see a large residual.
pub fn project(k: &FxFyCxCySkew<Real>, d: &BrownConrady5<Real>, p_c: &nalgebra::Point3<Real>) -> Pt2 {
    let z = if p_c.z.abs() < 1e-9 { 1e-9 } else { p_c.z };
    let n = d.distort(&Vec2::new(p_c.x / z, p_c.y / z));
    Pt2::new(k.fx * n.x + k.skew * n.y + k.cx, k.fy * n.y + k.cy)
}

/// Append `observed - projected` (x, y interleaved) for every point of `view`.
pub fn push_view_residuals(
    k: &FxFyCxCySkew<Real>,
    d: &BrownConrady5<Real>,
    cam_se3_target: &Iso3,
    view: &CorrespondenceView,
    out: &mut Vec<Real>,
) {
    for (p3, obs) in view.iter() {
        let proj = project(k, d, &cam_se3_target.transform_point(p3));
        out.push(proj.x - obs.x);
        out.push(proj.y - obs.y);
    }
}

/// Euclidean pixel error of every point of `view`.
pub fn view_point_errors(
    k: &FxFyCxCySkew<Real>,
    d: &BrownConrady5<Real>,
    cam_se3_target: &Iso3,
    view: &CorrespondenceView,
) -> Vec<Real> {
    view.iter()
        .map(|(p3, obs)| (project(k, d, &cam_se3_target.transform_point(p3)) - *obs).norm())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadcal_core::synthetic::{noise::UniformPixelNoise, rig::SyntheticRig};

    #[test]
    fn ground_truth_reprojects_exactly() {
        let rig = SyntheticRig::default();
        let frame = rig.frame(1, UniformPixelNoise::none()).unwrap();
        let view = frame.view(1).unwrap();
        let pose = rig.poses[1].cam_se3_rig() * rig.rig_se3_target(1);
        let intr = &rig.intrinsics[1];

        let errs = view_point_errors(&intr.k, &intr.dist, &pose, &view);
        assert_eq!(errs.len(), 48);
        assert!(errs.iter().all(|e| *e < 1e-9));

        let mut r = Vec::new();
        push_view_residuals(&intr.k, &intr.dist, &pose, &view, &mut r);
        assert_eq!(r.len(), 96);
    }
}
