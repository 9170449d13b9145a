//! Rendered test scenes: checkerboards and textured walls seen by a
//! known camera.
//!
//! Every pixel is 2×2 supersampled by casting rays through the distorted
//! camera model, so rendered images carry realistic lens distortion and
//! anti-aliased edges.

use image::{GrayImage, Luma};
use quadcal_core::synthetic::noise::{splitmix64, u64_to_unit};
use quadcal_core::synthetic::rig::SyntheticRig;
use quadcal_core::{CameraIntrinsics, ImageSize, Iso3, Real, Vec2, Vec3};
use rayon::prelude::*;

static SUBSAMPLES: [Real; 2] = [-0.25, 0.25];
const BACKGROUND: f32 = 128.0;
const WHITE: f32 = 220.0;
const BLACK: f32 = 40.0;

/// Texture cell sizes (texture units), coarse to fine.
const TEXTURE_CELLS: [Real; 3] = [20.0, 12.0, 7.0];

/// Unit viewing rays for every sub-sample of every pixel of one camera.
#[derive(Debug, Clone)]
pub struct ViewRays {
    size: ImageSize,
    dirs: Vec<Vec3>,
}

impl ViewRays {
    pub fn new(intr: &CameraIntrinsics) -> Self {
        let camera = intr.camera();
        let size = intr.image_size;
        let per_px = SUBSAMPLES.len() * SUBSAMPLES.len();
        let dirs = (0..size.num_pixels())
            .into_par_iter()
            .flat_map_iter(|i| {
                let u = (i % size.width as usize) as Real;
                let v = (i / size.width as usize) as Real;
                let camera = &camera;
                SUBSAMPLES.iter().flat_map(move |&dy| {
                    SUBSAMPLES
                        .iter()
                        .map(move |&dx| camera.backproject_pixel(&Vec2::new(u + dx, v + dy)).dir)
                })
            })
            .collect::<Vec<_>>();
        debug_assert_eq!(dirs.len(), size.num_pixels() * per_px);
        Self { size, dirs }
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Shade every pixel by averaging `shade` over its sub-sample rays.
    fn render<F>(&self, shade: F) -> GrayImage
    where
        F: Fn(&Vec3) -> f32 + Sync,
    {
        let per_px = SUBSAMPLES.len() * SUBSAMPLES.len();
        let data: Vec<u8> = self
            .dirs
            .par_chunks(per_px)
            .map(|rays| {
                let sum: f32 = rays.iter().map(&shade).sum();
                (sum / per_px as f32).round().clamp(0.0, 255.0) as u8
            })
            .collect();
        GrayImage::from_raw(self.size.width, self.size.height, data)
            .unwrap_or_else(|| GrayImage::new(self.size.width, self.size.height))
    }
}

/// Intersect a camera ray with the `z = 0` plane of `plane_se3_cam`.
#[inline]
fn hit_plane(plane_se3_cam: &Iso3, dir: &Vec3) -> Option<(Real, Real)> {
    let o = plane_se3_cam.translation.vector;
    let d = plane_se3_cam.rotation * dir;
    if d.z.abs() < 1e-12 {
        return None;
    }
    let s = -o.z / d.z;
    (s > 0.0).then(|| (o.x + s * d.x, o.y + s * d.y))
}

/// Checkerboard with `pattern` inner corners placed at the target-frame
/// grid positions, a one-square white margin and a grey background.
pub fn render_board(rays: &ViewRays, cam_se3_target: &Iso3, pattern: (usize, usize), square: Real) -> GrayImage {
    let target_se3_cam = cam_se3_target.inverse();
    let (cols, rows) = (pattern.0 as Real, pattern.1 as Real);
    rays.render(|dir| {
        let Some((x, y)) = hit_plane(&target_se3_cam, dir) else {
            return BACKGROUND;
        };
        let (i, j) = ((x / square).floor(), (y / square).floor());
        if i < -2.0 || j < -2.0 || i > cols + 1.0 || j > rows + 1.0 {
            BACKGROUND
        } else if i < -1.0 || j < -1.0 || i > cols || j > rows {
            WHITE
        } else if (i + j).rem_euclid(2.0) < 0.5 {
            BLACK
        } else {
            WHITE
        }
    })
}

/// Fronto-parallel textured wall at `distance` along the rig's z axis.
pub fn render_wall(rays: &ViewRays, cam_se3_rig: &Iso3, distance: Real, seed: u64) -> GrayImage {
    let wall_se3_cam = Iso3::translation(0.0, 0.0, -distance) * cam_se3_rig.inverse();
    rays.render(|dir| match hit_plane(&wall_se3_cam, dir) {
        // Two millimetres per texture unit.
        Some((x, y)) => texture_at(x * 0.5, y * 0.5, seed),
        None => BACKGROUND,
    })
}

/// Board for frame `idx` as seen by camera `cam` of a synthetic rig.
pub fn render_board_view(rig: &SyntheticRig, idx: usize, cam: usize) -> GrayImage {
    let rays = ViewRays::new(&rig.intrinsics[cam]);
    let cam_se3_target = rig.poses[cam].cam_se3_rig() * rig.rig_se3_target(idx);
    render_board(&rays, &cam_se3_target, rig.pattern, rig.square_size)
}

/// Flat texture image in pixel units.
pub fn render_texture(width: u32, height: u32, seed: u64) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        Luma([texture_at(x as Real + 0.5, y as Real + 0.5, seed) as u8])
    })
}

/// Layered random rectangles; finer layers paint over coarser ones.
fn texture_at(u: Real, v: Real, seed: u64) -> f32 {
    let mut value = BACKGROUND;
    for (layer, &cell) in TEXTURE_CELLS.iter().enumerate() {
        let (ci, cj) = ((u / cell).floor(), (v / cell).floor());
        let key = seed
            ^ (layer as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ (ci as i64 as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
            ^ (cj as i64 as u64).wrapping_mul(0x1656_67B1_9E37_79F9);
        let h = splitmix64(key);
        // Roughly half the cells of each layer carry a rectangle.
        if u64_to_unit(h) < 0.45 {
            continue;
        }
        let r = |k: u64| u64_to_unit(splitmix64(h ^ k));
        let x0 = ci * cell + r(1) * 0.4 * cell;
        let y0 = cj * cell + r(2) * 0.4 * cell;
        let x1 = x0 + (0.35 + 0.6 * r(3)) * (ci * cell + cell - x0);
        let y1 = y0 + (0.35 + 0.6 * r(4)) * (cj * cell + cell - y0);
        if u >= x0 && u < x1 && v >= y0 && v < y1 {
            value = 30.0 + (200.0 * r(5)) as f32;
        }
    }
    value
}
