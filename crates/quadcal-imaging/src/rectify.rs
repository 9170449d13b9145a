//! Stereo rectification of a calibrated camera pair.
//!
//! Both cameras are rotated half-way towards each other, then a common
//! rotation aligns the baseline with the image x axis (horizontal pairs)
//! or y axis (vertical pairs). Rectified views share one focal length and,
//! with zero-disparity alignment, one principal point, so corresponding
//! points end up on the same row (or column).
//!
//! Conventions: `r`/`t` map first-camera coordinates into the second
//! camera, `X2 = r · X1 + t`.

use image::GrayImage;
use nalgebra::Matrix3x4;
use quadcal_core::{
    distort_to_pixel, matrix_to_rvec, rvec_to_matrix, undistort_pixel, CameraIntrinsics, ImageSize, Mat3, Mat4,
    Pt2, Real, Vec2, Vec3,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::remap::{remap_bilinear, RemapTable};

/// Border samples per edge used to estimate the valid region.
const ROI_SAMPLES: usize = 9;

#[derive(Debug, Error, PartialEq)]
pub enum RectifyError {
    #[error("image sizes differ: {0} vs {1}")]
    SizeMismatch(ImageSize, ImageSize),
    #[error("baseline is zero")]
    ZeroBaseline,
    #[error("rectified geometry is degenerate")]
    Degenerate,
}

/// Image axis the baseline is aligned with after rectification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaselineAxis {
    /// Epipolar lines are image rows.
    Horizontal,
    /// Epipolar lines are image columns.
    Vertical,
}

/// Valid-pixel rectangle of a rectified image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Roi {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Roi {
    /// `[x, y, width, height]`.
    pub fn to_array(&self) -> [i32; 4] {
        [self.x, self.y, self.width, self.height]
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    fn clipped(self, size: ImageSize) -> Self {
        let x0 = self.x.clamp(0, size.width as i32);
        let y0 = self.y.clamp(0, size.height as i32);
        let x1 = (self.x + self.width).clamp(0, size.width as i32);
        let y1 = (self.y + self.height).clamp(0, size.height as i32);
        Self {
            x: x0,
            y: y0,
            width: (x1 - x0).max(0),
            height: (y1 - y0).max(0),
        }
    }
}

/// One side of a rectified pair.
#[derive(Debug, Clone)]
pub struct RectifiedView {
    pub intrinsics: CameraIntrinsics,
    /// Rectifying rotation (camera frame to rectified frame).
    pub rotation: Mat3,
    /// Projection matrix of the rectified camera.
    pub projection: Matrix3x4<Real>,
    pub roi: Roi,
    /// Rectified pixel -> source pixel.
    pub map: RemapTable,
}

impl RectifiedView {
    fn focal(&self) -> Real {
        self.projection[(0, 0)]
    }

    fn center(&self) -> (Real, Real) {
        (self.projection[(0, 2)], self.projection[(1, 2)])
    }

    /// Where a source pixel lands in the rectified image.
    pub fn rectify_pixel(&self, px: Pt2) -> Pt2 {
        let (cx, cy) = self.center();
        rectify_with(&self.intrinsics, &self.rotation, self.focal(), cx, cy, px)
    }

    /// Source pixel sampled for rectified pixel `(u, v)`.
    pub fn source_pixel(&self, u: Real, v: Real) -> Option<Pt2> {
        let (cx, cy) = self.center();
        source_with(&self.intrinsics, &self.rotation, self.focal(), cx, cy, u, v)
    }

    /// Resample a source image into the rectified frame.
    pub fn apply(&self, img: &GrayImage) -> GrayImage {
        remap_bilinear(img, &self.map)
    }
}

#[derive(Debug, Clone)]
pub struct StereoRectification {
    pub axis: BaselineAxis,
    pub image_size: ImageSize,
    pub first: RectifiedView,
    pub second: RectifiedView,
    /// Disparity-to-depth reprojection matrix.
    pub q: Mat4,
}

impl StereoRectification {
    /// Signed baseline along [`Self::axis`] in calibration units.
    pub fn baseline(&self) -> Real {
        let idx = match self.axis {
            BaselineAxis::Horizontal => 0,
            BaselineAxis::Vertical => 1,
        };
        self.second.projection[(idx, 3)] / self.second.focal()
    }
}

fn rectify_with(intr: &CameraIntrinsics, rot: &Mat3, f: Real, cx: Real, cy: Real, px: Pt2) -> Pt2 {
    let n = undistort_pixel(px, &intr.k, &intr.dist);
    let v = rot * Vec3::new(n.x, n.y, 1.0);
    Pt2::new(f * v.x / v.z + cx, f * v.y / v.z + cy)
}

fn source_with(intr: &CameraIntrinsics, rot: &Mat3, f: Real, cx: Real, cy: Real, u: Real, v: Real) -> Option<Pt2> {
    let ray = rot.transpose() * Vec3::new((u - cx) / f, (v - cy) / f, 1.0);
    if ray.z.abs() < 1e-12 {
        return None;
    }
    Some(distort_to_pixel(Vec2::new(ray.x / ray.z, ray.y / ray.z), &intr.k, &intr.dist))
}

/// Compute rectifying rotations, projections, valid regions and remap
/// tables for a camera pair at its calibrated resolution.
///
/// # Errors
///
/// [`RectifyError::SizeMismatch`] if the two cameras were calibrated at
/// different resolutions, [`RectifyError::ZeroBaseline`] if `t` is zero.
pub fn stereo_rectify(
    intr1: &CameraIntrinsics,
    intr2: &CameraIntrinsics,
    r: &Mat3,
    t: &Vec3,
) -> Result<StereoRectification, RectifyError> {
    if intr1.image_size != intr2.image_size {
        return Err(RectifyError::SizeMismatch(intr1.image_size, intr2.image_size));
    }
    let size = intr1.image_size;
    let nt = t.norm();
    if !(nt > 1e-12) {
        return Err(RectifyError::ZeroBaseline);
    }

    // Split the relative rotation evenly between the cameras.
    let r_half = rvec_to_matrix(&(matrix_to_rvec(r) * -0.5));
    let t_half = r_half * t;
    let idx = if t_half.x.abs() > t_half.y.abs() { 0 } else { 1 };
    let c = t_half[idx];
    let mut uu = Vec3::zeros();
    uu[idx] = if c > 0.0 { 1.0 } else { -1.0 };

    // Rotate the half-way baseline onto the chosen image axis.
    let mut ww = t_half.cross(&uu);
    let nw = ww.norm();
    if nw > 0.0 {
        ww *= (c.abs() / t_half.norm()).clamp(-1.0, 1.0).acos() / nw;
    }
    let w_r = rvec_to_matrix(&ww);
    let r1 = w_r * r_half.transpose();
    let r2 = w_r * r_half;
    let t_new = r2 * t;

    let k1 = &intr1.k;
    let k2 = &intr2.k;
    let fc = if idx == 0 { 0.5 * (k1.fy + k2.fy) } else { 0.5 * (k1.fx + k2.fx) };
    if !(fc.is_finite() && fc > 0.0) {
        return Err(RectifyError::Degenerate);
    }

    let cc1 = principal_point(intr1, &r1, fc, size);
    let cc2 = principal_point(intr2, &r2, fc, size);
    // Zero-disparity alignment: both views share the principal point.
    let cx = 0.5 * (cc1.0 + cc2.0);
    let cy = 0.5 * (cc1.1 + cc2.1);

    let mut p1 = Matrix3x4::zeros();
    p1[(0, 0)] = fc;
    p1[(1, 1)] = fc;
    p1[(0, 2)] = cx;
    p1[(1, 2)] = cy;
    p1[(2, 2)] = 1.0;
    let mut p2 = p1;
    p2[(idx, 3)] = t_new[idx] * fc;

    let mut q = Mat4::identity();
    q[(0, 3)] = -cx;
    q[(1, 3)] = -cy;
    q[(2, 2)] = 0.0;
    q[(2, 3)] = fc;
    q[(3, 2)] = -1.0 / t_new[idx];
    q[(3, 3)] = 0.0;

    let roi1 = valid_roi(intr1, &r1, fc, cx, cy, size);
    let roi2 = valid_roi(intr2, &r2, fc, cx, cy, size);
    let map1 = build_map(intr1, &r1, fc, cx, cy, size);
    let map2 = build_map(intr2, &r2, fc, cx, cy, size);

    tracing::debug!(
        axis = if idx == 0 { "horizontal" } else { "vertical" },
        baseline = t_new[idx],
        focal = fc,
        "rectified pair"
    );

    Ok(StereoRectification {
        axis: if idx == 0 {
            BaselineAxis::Horizontal
        } else {
            BaselineAxis::Vertical
        },
        image_size: size,
        first: RectifiedView {
            intrinsics: *intr1,
            rotation: r1,
            projection: p1,
            roi: roi1,
            map: map1,
        },
        second: RectifiedView {
            intrinsics: *intr2,
            rotation: r2,
            projection: p2,
            roi: roi2,
            map: map2,
        },
        q,
    })
}

/// Principal point that centres the rectified image corners.
fn principal_point(intr: &CameraIntrinsics, rot: &Mat3, fc: Real, size: ImageSize) -> (Real, Real) {
    let w = (size.width - 1) as Real;
    let h = (size.height - 1) as Real;
    let corners = [Pt2::new(0.0, 0.0), Pt2::new(w, 0.0), Pt2::new(0.0, h), Pt2::new(w, h)];
    let (mut sx, mut sy) = (0.0, 0.0);
    for px in corners {
        let p = rectify_with(intr, rot, fc, 0.0, 0.0, px);
        sx += p.x;
        sy += p.y;
    }
    (0.5 * w - sx / 4.0, 0.5 * h - sy / 4.0)
}

/// Largest axis-aligned rectangle inside the rectified image border.
fn valid_roi(intr: &CameraIntrinsics, rot: &Mat3, fc: Real, cx: Real, cy: Real, size: ImageSize) -> Roi {
    let n = ROI_SAMPLES - 1;
    let w = size.width as Real;
    let h = size.height as Real;
    let (mut left, mut top) = (Real::MIN, Real::MIN);
    let (mut right, mut bottom) = (Real::MAX, Real::MAX);
    for j in 0..=n {
        for i in 0..=n {
            let px = Pt2::new(i as Real * w / n as Real, j as Real * h / n as Real);
            let p = rectify_with(intr, rot, fc, cx, cy, px);
            if i == 0 {
                left = left.max(p.x);
            }
            if i == n {
                right = right.min(p.x);
            }
            if j == 0 {
                top = top.max(p.y);
            }
            if j == n {
                bottom = bottom.min(p.y);
            }
        }
    }
    Roi {
        x: left.ceil() as i32,
        y: top.ceil() as i32,
        width: (right - left).floor() as i32,
        height: (bottom - top).floor() as i32,
    }
    .clipped(size)
}

fn build_map(intr: &CameraIntrinsics, rot: &Mat3, fc: Real, cx: Real, cy: Real, size: ImageSize) -> RemapTable {
    RemapTable::from_fn(size.width, size.height, |u, v| {
        match source_with(intr, rot, fc, cx, cy, u as Real, v as Real) {
            Some(p) => (p.x as f32, p.y as f32),
            None => (-1.0, -1.0),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use quadcal_core::synthetic::rig::SyntheticRig;
    use quadcal_core::Pt3;

    fn relative(rig: &SyntheticRig, a: usize, b: usize) -> (Mat3, Vec3) {
        let pa = &rig.poses[a];
        let pb = &rig.poses[b];
        let r = pb.rotation() * pa.rotation().transpose();
        let t = pb.rotation() * (pa.tvec - pb.tvec);
        (r, t)
    }

    fn project(rig: &SyntheticRig, cam: usize, x: &Pt3) -> Pt2 {
        let pc = rig.poses[cam].cam_se3_rig().transform_point(x);
        let px = rig.intrinsics[cam].camera().project_point(&pc).unwrap();
        Pt2::from(px)
    }

    fn scene_points() -> Vec<Pt3> {
        let mut pts = Vec::new();
        for i in -3..=3 {
            for j in -2..=2 {
                pts.push(Pt3::new(i as Real * 60.0, j as Real * 50.0, 700.0 + (i * j) as Real * 15.0));
            }
        }
        pts
    }

    #[test]
    fn horizontal_pair_aligns_rows() {
        let rig = SyntheticRig::default();
        let (r, t) = relative(&rig, 0, 3);
        let rect = stereo_rectify(&rig.intrinsics[0], &rig.intrinsics[3], &r, &t).unwrap();
        assert_eq!(rect.axis, BaselineAxis::Horizontal);
        assert_relative_eq!(rect.baseline().abs(), 50.0, epsilon = 0.5);

        for x in scene_points() {
            let a = rect.first.rectify_pixel(project(&rig, 0, &x));
            let b = rect.second.rectify_pixel(project(&rig, 3, &x));
            assert!((a.y - b.y).abs() < 1e-3, "row mismatch {} vs {}", a.y, b.y);
            assert!(a.x > b.x, "points in front of the rig have positive disparity");
        }
    }

    #[test]
    fn vertical_pair_aligns_columns() {
        let rig = SyntheticRig::default();
        let (r, t) = relative(&rig, 0, 1);
        let rect = stereo_rectify(&rig.intrinsics[0], &rig.intrinsics[1], &r, &t).unwrap();
        assert_eq!(rect.axis, BaselineAxis::Vertical);
        for x in scene_points() {
            let a = rect.first.rectify_pixel(project(&rig, 0, &x));
            let b = rect.second.rectify_pixel(project(&rig, 1, &x));
            assert!((a.x - b.x).abs() < 1e-3, "column mismatch {} vs {}", a.x, b.x);
        }
    }

    #[test]
    fn map_inverts_point_rectification() {
        let rig = SyntheticRig::default();
        let (r, t) = relative(&rig, 1, 2);
        let rect = stereo_rectify(&rig.intrinsics[1], &rig.intrinsics[2], &r, &t).unwrap();
        for &(u, v) in &[(100u32, 80u32), (320, 200), (500, 350)] {
            let (sx, sy) = rect.second.map.get(u, v);
            let back = rect.second.rectify_pixel(Pt2::new(sx as Real, sy as Real));
            assert!((back.x - u as Real).abs() < 1e-2);
            assert!((back.y - v as Real).abs() < 1e-2);
        }
        assert!(!rect.first.roi.is_empty());
        assert!(rect.first.roi.width <= 640 && rect.first.roi.height <= 400);
    }

    #[test]
    fn q_matrix_matches_projection() {
        let rig = SyntheticRig::default();
        let (r, t) = relative(&rig, 0, 3);
        let rect = stereo_rectify(&rig.intrinsics[0], &rig.intrinsics[3], &r, &t).unwrap();
        let p2 = &rect.second.projection;
        assert_relative_eq!(rect.q[(3, 2)], -p2[(0, 0)] / p2[(0, 3)], epsilon = 1e-12);
        assert_eq!(rect.q[(2, 3)], p2[(0, 0)]);
    }

    #[test]
    fn rejects_zero_baseline_and_size_mismatch() {
        let rig = SyntheticRig::default();
        let err = stereo_rectify(&rig.intrinsics[0], &rig.intrinsics[1], &Mat3::identity(), &Vec3::zeros()).unwrap_err();
        assert_eq!(err, RectifyError::ZeroBaseline);

        let big = rig.intrinsics[1].rescaled_to(ImageSize::new(1280, 800));
        let err = stereo_rectify(&rig.intrinsics[0], &big, &Mat3::identity(), &Vec3::x()).unwrap_err();
        assert!(matches!(err, RectifyError::SizeMismatch(..)));
    }
}
