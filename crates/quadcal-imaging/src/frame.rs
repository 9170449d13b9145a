//! Combined sensor frame handling.

use image::{imageops, ImageBuffer, Pixel};
use quadcal_core::NUM_CAMERAS;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("combined frame width {0} is not divisible by {NUM_CAMERAS}")]
    UnevenWidth(u32),
    #[error("combined frame is empty")]
    Empty,
}

/// Split the side-by-side sensor image into four equal-width views,
/// left to right.
pub fn split_equal_width<P>(
    combined: &ImageBuffer<P, Vec<P::Subpixel>>,
) -> Result<[ImageBuffer<P, Vec<P::Subpixel>>; NUM_CAMERAS], FrameError>
where
    P: Pixel + 'static,
{
    let (w, h) = combined.dimensions();
    if w == 0 || h == 0 {
        return Err(FrameError::Empty);
    }
    if w % NUM_CAMERAS as u32 != 0 {
        return Err(FrameError::UnevenWidth(w));
    }
    let cam_w = w / NUM_CAMERAS as u32;
    Ok(std::array::from_fn(|i| {
        imageops::crop_imm(combined, i as u32 * cam_w, 0, cam_w, h).to_image()
    }))
}
