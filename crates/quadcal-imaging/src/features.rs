//! Oriented binary features for rectification checks.
//!
//! FAST-9 corners are detected on every level of a scale pyramid, given an
//! intensity-centroid orientation and described by 256 BRIEF intensity
//! tests rotated into that orientation. Descriptors are matched by Hamming
//! distance with Lowe's ratio test and an optional mutual check.

use std::sync::OnceLock;

use image::imageops::{resize, FilterType};
use image::GrayImage;
use imageproc::corners::{corners_fast9, Corner};
use imageproc::filter::gaussian_blur_f32;
use imageproc::suppress::local_maxima;
use quadcal_core::synthetic::noise::{splitmix64, u64_to_unit};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::sample::bilinear_u8;

/// Radius of the orientation disk and the zero-pixel validity check.
pub const PATCH_RADIUS: u32 = 15;
/// Test points lie inside this radius around the keypoint.
const TEST_RADIUS: f32 = 13.0;
const TEST_PATTERN_SEED: u64 = 0x0b1e_f00d;

/// 256 binary intensity tests.
pub type Descriptor = [u64; 4];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub fast_threshold: u8,
    /// Strongest keypoints kept per image, shared across pyramid levels.
    pub max_keypoints: usize,
    pub levels: usize,
    /// Downscale between consecutive pyramid levels.
    pub scale_factor: f32,
    /// Smoothing applied to a level before sampling the tests.
    pub blur_sigma: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            max_keypoints: 1500,
            levels: 6,
            scale_factor: 1.2,
            blur_sigma: 1.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Lowe ratio: keep a match when `best < ratio * second_best`.
    pub ratio: f32,
    /// Largest accepted Hamming distance, in bits.
    pub max_distance: u32,
    pub cross_check: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            ratio: 0.7,
            max_distance: 64,
            cross_check: true,
        }
    }
}

/// Keypoint in full-resolution pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub score: f32,
    /// Intensity-centroid direction in radians, image axes (y down).
    pub angle: f32,
    pub level: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl Features {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMatch {
    pub query: usize,
    pub train: usize,
    /// Hamming distance between the two descriptors.
    pub distance: u32,
}

struct Level {
    image: GrayImage,
    smooth: GrayImage,
    /// Full-resolution pixels per level pixel, per axis.
    scale: (f32, f32),
}

impl Level {
    #[inline]
    fn to_full(&self, x: f32, y: f32) -> (f32, f32) {
        ((x + 0.5) * self.scale.0 - 0.5, (y + 0.5) * self.scale.1 - 0.5)
    }
}

fn build_pyramid(img: &GrayImage, cfg: &FeatureConfig) -> Vec<Level> {
    let (w, h) = img.dimensions();
    let min_side = 2 * PATCH_RADIUS + 1;
    let mut levels = Vec::new();
    for k in 0..cfg.levels.max(1) {
        let s = cfg.scale_factor.max(1.0).powi(k as i32);
        let (lw, lh) = ((w as f32 / s).round() as u32, (h as f32 / s).round() as u32);
        if lw < min_side || lh < min_side {
            break;
        }
        let image = if k == 0 {
            img.clone()
        } else {
            resize(img, lw, lh, FilterType::Triangle)
        };
        let smooth = if cfg.blur_sigma > 0.0 {
            gaussian_blur_f32(&image, cfg.blur_sigma)
        } else {
            image.clone()
        };
        levels.push(Level {
            image,
            smooth,
            scale: (w as f32 / lw as f32, h as f32 / lh as f32),
        });
    }
    levels
}

/// Keypoint budget per level, geometric in the level area.
fn level_quotas(total: usize, levels: usize, scale_factor: f32) -> Vec<usize> {
    let f = 1.0 / (scale_factor.max(1.0) * scale_factor.max(1.0));
    let weights: Vec<f32> = (0..levels).map(|k| f.powi(k as i32)).collect();
    let sum: f32 = weights.iter().sum();
    weights
        .iter()
        .map(|w| ((total as f32 * w / sum).round() as usize).max(1))
        .collect()
}

fn test_pattern() -> &'static [[(f32, f32); 2]] {
    static PATTERN: OnceLock<Vec<[(f32, f32); 2]>> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Isotropic Gaussian sampling (sigma = patch size / 5), clipped to
        // the test disk.
        let sigma = (2.0 * PATCH_RADIUS as f64 + 1.0) / 5.0;
        let mut state = TEST_PATTERN_SEED;
        let mut next_point = || loop {
            state = splitmix64(state);
            let u1 = u64_to_unit(state).max(f64::MIN_POSITIVE);
            state = splitmix64(state);
            let u2 = u64_to_unit(state);
            let r = sigma * (-2.0 * u1.ln()).sqrt();
            let a = std::f64::consts::TAU * u2;
            let p = ((r * a.cos()) as f32, (r * a.sin()) as f32);
            if p.0.hypot(p.1) <= TEST_RADIUS {
                return p;
            }
        };
        (0..256).map(|_| [next_point(), next_point()]).collect()
    })
}

/// Intensity centroid direction over the orientation disk.
fn orientation(img: &GrayImage, x: u32, y: u32) -> f32 {
    let r = PATCH_RADIUS as i64;
    let (mut m10, mut m01) = (0i64, 0i64);
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let v = img.get_pixel((x as i64 + dx) as u32, (y as i64 + dy) as u32).0[0] as i64;
            m10 += dx * v;
            m01 += dy * v;
        }
    }
    (m01 as f32).atan2(m10 as f32)
}

/// `false` when the keypoint's full-resolution disk leaves the image or
/// touches a zero-valued (unmapped) pixel.
fn disk_is_valid(img: &GrayImage, fx: f32, fy: f32, radius: f32) -> bool {
    let (w, h) = img.dimensions();
    let r2 = radius * radius;
    let (x0, x1) = ((fx - radius).ceil() as i64, (fx + radius).floor() as i64);
    let (y0, y1) = ((fy - radius).ceil() as i64, (fy + radius).floor() as i64);
    if x0 < 0 || y0 < 0 || x1 >= w as i64 || y1 >= h as i64 {
        return false;
    }
    (y0..=y1).all(|yy| {
        (x0..=x1).all(|xx| {
            let (dx, dy) = (xx as f32 - fx, yy as f32 - fy);
            dx * dx + dy * dy > r2 || img.get_pixel(xx as u32, yy as u32).0[0] != 0
        })
    })
}

fn describe(smooth: &GrayImage, x: f32, y: f32, angle: f32) -> Option<Descriptor> {
    let (s, c) = angle.sin_cos();
    let sample = |(dx, dy): (f32, f32)| bilinear_u8(smooth, x + c * dx - s * dy, y + s * dx + c * dy);
    let mut desc = [0u64; 4];
    for (bit, [p, q]) in test_pattern().iter().enumerate() {
        if sample(*p)? < sample(*q)? {
            desc[bit / 64] |= 1 << (bit % 64);
        }
    }
    // Flat patches answer every test the same way.
    let ones: u32 = desc.iter().map(|w| w.count_ones()).sum();
    (16..=240).contains(&ones).then_some(desc)
}

/// Detect oriented keypoints on every pyramid level and describe them.
///
/// Keypoints whose disk touches zero-valued pixels (outside a remapped
/// image) or whose patch has no texture are dropped.
pub fn extract_features(img: &GrayImage, cfg: &FeatureConfig) -> Features {
    let pyramid = build_pyramid(img, cfg);
    let quotas = level_quotas(cfg.max_keypoints, pyramid.len(), cfg.scale_factor);
    let r = PATCH_RADIUS;

    let mut out = Features::default();
    for (idx, (level, &quota)) in pyramid.iter().zip(&quotas).enumerate() {
        let (w, h) = level.image.dimensions();
        let mut corners: Vec<Corner> = corners_fast9(&level.image, cfg.fast_threshold)
            .into_iter()
            .filter(|c| c.x >= r && c.y >= r && c.x + r < w && c.y + r < h)
            .collect();
        corners = local_maxima(&corners, 2);
        corners.sort_by(|a, b| b.score.total_cmp(&a.score).then((a.y, a.x).cmp(&(b.y, b.x))));
        corners.truncate(quota);

        let radius = r as f32 * level.scale.0.max(level.scale.1);
        let described: Vec<Option<(Keypoint, Descriptor)>> = corners
            .par_iter()
            .map(|c| {
                let (fx, fy) = level.to_full(c.x as f32, c.y as f32);
                if !disk_is_valid(img, fx, fy, radius) {
                    return None;
                }
                let angle = orientation(&level.image, c.x, c.y);
                let desc = describe(&level.smooth, c.x as f32, c.y as f32, angle)?;
                let kp = Keypoint {
                    x: fx,
                    y: fy,
                    score: c.score,
                    angle,
                    level: idx,
                };
                Some((kp, desc))
            })
            .collect();

        for (kp, d) in described.into_iter().flatten() {
            out.keypoints.push(kp);
            out.descriptors.push(d);
        }
    }
    tracing::trace!(keypoints = out.len(), levels = pyramid.len(), "features extracted");
    out
}

#[inline]
fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Nearest neighbours of `a` in `b` within `cfg.max_distance` passing the
/// ratio test, optionally kept only when mutual.
pub fn match_features(a: &Features, b: &Features, cfg: &MatchConfig) -> Vec<FeatureMatch> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }

    let forward: Vec<(usize, u32, u32)> = a
        .descriptors
        .par_iter()
        .map(|da| {
            let (mut best_j, mut best, mut second) = (0, u32::MAX, u32::MAX);
            for (j, db) in b.descriptors.iter().enumerate() {
                let d = hamming(da, db);
                if d < best {
                    second = best;
                    best = d;
                    best_j = j;
                } else if d < second {
                    second = d;
                }
            }
            (best_j, best, second)
        })
        .collect();

    let reverse: Option<Vec<usize>> = cfg.cross_check.then(|| {
        b.descriptors
            .par_iter()
            .map(|db| {
                let mut best = (0, u32::MAX);
                for (i, da) in a.descriptors.iter().enumerate() {
                    let d = hamming(da, db);
                    if d < best.1 {
                        best = (i, d);
                    }
                }
                best.0
            })
            .collect()
    });

    let mut matches = Vec::new();
    for (i, &(j, best, second)) in forward.iter().enumerate() {
        if best > cfg.max_distance {
            continue;
        }
        // A lone candidate has no second neighbour to compare against.
        if b.len() > 1 && best as f32 >= cfg.ratio * second as f32 {
            continue;
        }
        if let Some(rev) = &reverse {
            if rev[j] != i {
                continue;
            }
        }
        matches.push(FeatureMatch {
            query: i,
            train: j,
            distance: best,
        });
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::render_texture;
    use image::Luma;
    use imageproc::geometric_transformations::{warp_with, Interpolation};

    /// Warp `img` by `p -> c + scale * R(angle) * (p - c)` about the image
    /// centre; returns the warped image and the forward point map.
    fn similarity(img: &GrayImage, angle: f32, scale: f32) -> (GrayImage, impl Fn(f32, f32) -> (f32, f32)) {
        let (cx, cy) = ((img.width() - 1) as f32 / 2.0, (img.height() - 1) as f32 / 2.0);
        let (s, c) = angle.sin_cos();
        let inverse = move |x: f32, y: f32| {
            let (dx, dy) = ((x - cx) / scale, (y - cy) / scale);
            (cx + c * dx + s * dy, cy - s * dx + c * dy)
        };
        let forward = move |x: f32, y: f32| {
            let (dx, dy) = (x - cx, y - cy);
            (cx + scale * (c * dx - s * dy), cy + scale * (s * dx + c * dy))
        };
        (warp_with(img, inverse, Interpolation::Bilinear, Luma([0])), forward)
    }

    /// (matches, matches landing within `tol` px of the mapped position).
    fn score<F: Fn(f32, f32) -> (f32, f32)>(a: &Features, b: &Features, map: F, tol: f32) -> (usize, usize) {
        let m = match_features(a, b, &MatchConfig::default());
        let good = m
            .iter()
            .filter(|mm| {
                let (ka, kb) = (a.keypoints[mm.query], b.keypoints[mm.train]);
                let (x, y) = map(ka.x, ka.y);
                (x - kb.x).hypot(y - kb.y) < tol
            })
            .count();
        (m.len(), good)
    }

    #[test]
    fn shifted_texture_matches_with_constant_offset() {
        let base = render_texture(400, 300, 11);
        let shifted = GrayImage::from_fn(380, 300, |x, y| *base.get_pixel(x + 20, y));
        let a = extract_features(&base, &FeatureConfig::default());
        let b = extract_features(&shifted, &FeatureConfig::default());
        assert!(a.len() > 50, "only {} keypoints", a.len());

        let (n, good) = score(&a, &b, |x, y| (x - 20.0, y), 2.0);
        assert!(n > 30, "only {n} matches");
        assert!(good as f32 > 0.9 * n as f32, "{good} of {n} matches consistent");

        // Level-0 keypoints land on the same pixel in both images.
        let m = match_features(&a, &b, &MatchConfig::default());
        assert!(m.iter().any(|mm| {
            let (ka, kb) = (a.keypoints[mm.query], b.keypoints[mm.train]);
            ka.level == 0 && ka.x - kb.x == 20.0 && ka.y == kb.y
        }));
    }

    #[test]
    fn rotated_texture_still_matches() {
        let base = render_texture(400, 400, 5);
        let (rotated, forward) = similarity(&base, 20f32.to_radians(), 1.0);
        let a = extract_features(&base, &FeatureConfig::default());
        let b = extract_features(&rotated, &FeatureConfig::default());

        let (n, good) = score(&a, &b, forward, 3.0);
        assert!(good >= 25, "{good} of {n} matches consistent with a 20° rotation");
        assert!(good as f32 >= 0.8 * n as f32, "{good} of {n} matches consistent");
    }

    #[test]
    fn scaled_texture_still_matches() {
        let base = render_texture(400, 400, 7);
        let (zoomed, forward) = similarity(&base, 0.0, 1.5);
        let a = extract_features(&base, &FeatureConfig::default());
        let b = extract_features(&zoomed, &FeatureConfig::default());

        let (n, good) = score(&a, &b, forward, 3.0);
        assert!(good >= 25, "{good} of {n} matches consistent with a 1.5× zoom");
        assert!(good as f32 >= 0.8 * n as f32, "{good} of {n} matches consistent");
        assert!(
            b.keypoints.iter().any(|k| k.level >= 2),
            "zoomed image produced no coarse-level keypoints"
        );
    }

    #[test]
    fn orientation_follows_the_bright_side() {
        let img = GrayImage::from_fn(41, 41, |x, y| Luma([if y > 20 || (y == 20 && x > 20) { 200 } else { 50 }]));
        let angle = orientation(&img, 20, 20);
        assert!((angle - std::f32::consts::FRAC_PI_2).abs() < 0.1, "angle {angle}");
    }

    #[test]
    fn zero_pixels_invalidate_patches() {
        let mut img = render_texture(160, 160, 3);
        for y in 0..160 {
            for x in 0..60 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        let f = extract_features(&img, &FeatureConfig::default());
        assert!(!f.is_empty());
        assert!(f.keypoints.iter().all(|k| k.x >= 60.0 + PATCH_RADIUS as f32));
    }

    #[test]
    fn empty_inputs_yield_no_matches() {
        let f = Features::default();
        assert!(match_features(&f, &f, &MatchConfig::default()).is_empty());
    }

    #[test]
    fn distant_descriptors_are_rejected() {
        let a = Features {
            keypoints: vec![Keypoint {
                x: 0.0,
                y: 0.0,
                score: 1.0,
                angle: 0.0,
                level: 0,
            }],
            descriptors: vec![[0; 4]],
        };
        let mut b = a.clone();
        b.descriptors[0] = [u64::MAX, 0, 0, 0];
        assert!(match_features(&a, &b, &MatchConfig::default()).is_empty());
        b.descriptors[0] = [0xff, 0, 0, 0];
        assert_eq!(match_features(&a, &b, &MatchConfig::default())[0].distance, 8);
    }
}
