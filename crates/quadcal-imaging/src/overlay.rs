//! Visual verification images for rectified pairs.

use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;

use crate::rectify::BaselineAxis;

/// Per-camera tint: red, green, blue, yellow.
pub const CAMERA_COLORS: [Rgb<u8>; 4] = [Rgb([255, 0, 0]), Rgb([0, 255, 0]), Rgb([0, 0, 255]), Rgb([255, 255, 0])];

/// Guide line spacing in pixels.
pub const LINE_SPACING: u32 = 40;

/// Tint pixels brighter than 50 towards `color`; dark pixels stay grey.
pub fn colorize(img: &GrayImage, color: Rgb<u8>, alpha: f32) -> RgbImage {
    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let g = img.get_pixel(x, y).0[0];
        if g <= 50 {
            return Rgb([g, g, g]);
        }
        let mix = |c: u8| ((1.0 - alpha) * g as f32 + alpha * c as f32).round() as u8;
        Rgb([mix(color.0[0]), mix(color.0[1]), mix(color.0[2])])
    })
}

fn draw_guides(img: &mut RgbImage, axis: BaselineAxis, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    match axis {
        BaselineAxis::Horizontal => {
            for y in (0..h).step_by(LINE_SPACING as usize) {
                draw_line_segment_mut(img, (0.0, y as f32), (w as f32 - 1.0, y as f32), color);
            }
        }
        BaselineAxis::Vertical => {
            for x in (0..w).step_by(LINE_SPACING as usize) {
                draw_line_segment_mut(img, (x as f32, 0.0), (x as f32, h as f32 - 1.0), color);
            }
        }
    }
}

/// Both rectified views tinted by camera colour, blended 50/50, with
/// white guide lines along the epipolar direction.
pub fn alignment_overlay(
    rect1: &GrayImage,
    rect2: &GrayImage,
    cams: (usize, usize),
    axis: BaselineAxis,
    alpha: f32,
) -> RgbImage {
    let tint = |cam: usize| CAMERA_COLORS[cam % CAMERA_COLORS.len()];
    let a = colorize(rect1, tint(cams.0), alpha);
    let b = colorize(rect2, tint(cams.1), alpha);
    let mut out = RgbImage::from_fn(a.width().min(b.width()), a.height().min(b.height()), |x, y| {
        let (pa, pb) = (a.get_pixel(x, y).0, b.get_pixel(x, y).0);
        Rgb([0, 1, 2].map(|c| ((pa[c] as u16 + pb[c] as u16 + 1) / 2) as u8))
    });
    draw_guides(&mut out, axis, Rgb([255, 255, 255]));
    out
}

/// Rectified views placed next to each other along the baseline with
/// green guide lines across both.
pub fn rectified_pair(rect1: &GrayImage, rect2: &GrayImage, axis: BaselineAxis) -> RgbImage {
    let (w, h) = rect1.dimensions();
    let (ow, oh) = match axis {
        BaselineAxis::Horizontal => (w + rect2.width(), h.max(rect2.height())),
        BaselineAxis::Vertical => (w.max(rect2.width()), h + rect2.height()),
    };
    let mut out = RgbImage::new(ow, oh);
    let (dx, dy) = match axis {
        BaselineAxis::Horizontal => (w, 0),
        BaselineAxis::Vertical => (0, h),
    };
    for (x, y, p) in rect1.enumerate_pixels() {
        out.put_pixel(x, y, Rgb([p.0[0]; 3]));
    }
    for (x, y, p) in rect2.enumerate_pixels() {
        out.put_pixel(x + dx, y + dy, Rgb([p.0[0]; 3]));
    }
    draw_guides(&mut out, axis, Rgb([0, 255, 0]));
    out
}
