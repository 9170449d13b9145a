//! Deterministic noise helpers for synthetic datasets.
//!
//! A SplitMix64 stream keyed by `(frame, camera, point)` keeps generated
//! datasets identical across platforms and library versions.

use crate::{Real, Vec2};

/// Zero-mean uniform pixel noise in `[-max_abs_px, +max_abs_px]` per axis.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UniformPixelNoise {
    /// Base seed controlling the pseudo-random sequence.
    pub seed: u64,
    /// Maximum absolute per-axis noise (pixels).
    pub max_abs_px: Real,
}

impl UniformPixelNoise {
    pub fn none() -> Self {
        Self::default()
    }

    /// Sample a 2D noise vector for a `(frame, camera, point)` key.
    #[inline]
    pub fn sample(&self, frame_idx: usize, cam_idx: usize, point_idx: usize) -> Vec2 {
        let max_abs = self.max_abs_px.abs();
        if max_abs == 0.0 {
            return Vec2::zeros();
        }

        let key = mix_key(self.seed, frame_idx, cam_idx, point_idx);
        let u = u64_to_unit(splitmix64(key));
        let v = u64_to_unit(splitmix64(key ^ 0x94D0_49BB_1331_11EB));

        Vec2::new((u - 0.5) * 2.0 * max_abs, (v - 0.5) * 2.0 * max_abs)
    }
}

#[inline]
fn mix_key(seed: u64, frame_idx: usize, cam_idx: usize, point_idx: usize) -> u64 {
    seed ^ (frame_idx as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (cam_idx as u64).wrapping_mul(0xD6E8_FEB8_6659_FD93)
        ^ (point_idx as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9)
}

/// One SplitMix64 step; a cheap, well-mixed hash of `x`.
#[inline]
pub fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Top 53 bits mapped to `[0, 1)`.
#[inline]
pub fn u64_to_unit(x: u64) -> Real {
    let mantissa = x >> 11;
    (mantissa as Real) * (1.0 / ((1u64 << 53) as Real))
}
