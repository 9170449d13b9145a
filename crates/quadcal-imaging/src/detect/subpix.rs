//! Iterative gradient-orthogonality corner refinement.
//!
//! At the true corner `q`, every image gradient `g(p)` in a neighbourhood
//! is orthogonal to `p - q`. Solving the weighted normal equations
//! `Σ w g gᵀ · q = Σ w g gᵀ · p` and iterating converges to that point.

use serde::{Deserialize, Serialize};

use crate::sample::bilinear_f32;
use crate::FloatImage;
use quadcal_core::Pt2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubpixConfig {
    /// Window is `(2 * half_window + 1)²`.
    pub half_window: usize,
    pub max_iters: usize,
    /// Stop once an update moves the corner less than this (pixels).
    pub epsilon: f64,
}

impl Default for SubpixConfig {
    fn default() -> Self {
        Self {
            half_window: 5,
            max_iters: 30,
            epsilon: 0.1,
        }
    }
}

/// Refine every corner in place. A corner that would leave its search
/// window keeps its input position.
pub fn refine_corners(img: &FloatImage, corners: &mut [Pt2], cfg: &SubpixConfig) {
    let hw = cfg.half_window as i32;
    let coeff = 1.0 / (cfg.half_window.max(1) as f32).powi(2);
    let weights: Vec<f32> = (-hw..=hw).map(|d| (-(d * d) as f32 * coeff).exp()).collect();

    for corner in corners.iter_mut() {
        let start = (corner.x as f32, corner.y as f32);
        let mut c = start;
        for _ in 0..cfg.max_iters {
            let (mut a, mut b, mut cc, mut bb1, mut bb2) = (0.0f32, 0.0f32, 0.0f32, 0.0f32, 0.0f32);
            for (iy, dy) in (-hw..=hw).enumerate() {
                for (ix, dx) in (-hw..=hw).enumerate() {
                    let px = c.0 + dx as f32;
                    let py = c.1 + dy as f32;
                    let gx = 0.5 * (bilinear_f32(img, px + 1.0, py) - bilinear_f32(img, px - 1.0, py));
                    let gy = 0.5 * (bilinear_f32(img, px, py + 1.0) - bilinear_f32(img, px, py - 1.0));
                    let m = weights[ix] * weights[iy];
                    let gxx = gx * gx * m;
                    let gxy = gx * gy * m;
                    let gyy = gy * gy * m;
                    a += gxx;
                    b += gxy;
                    cc += gyy;
                    bb1 += gxx * px + gxy * py;
                    bb2 += gxy * px + gyy * py;
                }
            }
            let det = a * cc - b * b;
            if det.abs() <= f32::EPSILON * (a * cc).abs().max(1.0) {
                break;
            }
            let nx = (cc * bb1 - b * bb2) / det;
            let ny = (a * bb2 - b * bb1) / det;
            let moved = ((nx - c.0).powi(2) + (ny - c.1).powi(2)).sqrt();
            c = (nx, ny);
            if (moved as f64) < cfg.epsilon {
                break;
            }
        }
        let drift = ((c.0 - start.0).abs()).max((c.1 - start.1).abs());
        if c.0.is_finite() && c.1.is_finite() && drift <= hw as f32 {
            *corner = Pt2::new(c.0 as f64, c.1 as f64);
        }
    }
}
