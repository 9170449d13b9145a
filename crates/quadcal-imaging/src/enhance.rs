//! Photometric preprocessing ahead of detection.

use image::{GrayImage, Luma};
use quadcal_core::NUM_CAMERAS;
use serde::{Deserialize, Serialize};

/// Per-camera brightness multipliers applied before contrast
/// normalization, for rigs whose filters pass very different amounts of
/// light.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrightnessCompensation {
    pub per_camera: [f32; NUM_CAMERAS],
}

impl Default for BrightnessCompensation {
    fn default() -> Self {
        Self {
            per_camera: [1.0; NUM_CAMERAS],
        }
    }
}

impl BrightnessCompensation {
    pub fn factor(&self, cam: usize) -> f32 {
        self.per_camera.get(cam).copied().unwrap_or(1.0)
    }

    /// Scale camera `cam`'s image; a factor of 1 returns an unchanged copy.
    pub fn apply(&self, cam: usize, img: &GrayImage) -> GrayImage {
        let f = self.factor(cam);
        if f == 1.0 {
            return img.clone();
        }
        scale_offset(img, f, 0.0)
    }
}

/// `saturate(|gain * v + offset|)` per pixel.
pub fn scale_offset(img: &GrayImage, gain: f32, offset: f32) -> GrayImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        let v = (gain * p.0[0] as f32 + offset).abs().round();
        *p = Luma([v.min(255.0) as u8]);
    }
    out
}

/// Contrast normalization followed by a light Gaussian blur.
pub fn normalize_contrast(img: &GrayImage, gain: f32, offset: f32, blur_sigma: f32) -> GrayImage {
    let stretched = scale_offset(img, gain, offset);
    if blur_sigma > 0.0 {
        imageproc::filter::gaussian_blur_f32(&stretched, blur_sigma)
    } else {
        stretched
    }
}
