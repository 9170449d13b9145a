//! Sub-pixel image sampling.

use image::GrayImage;

use crate::FloatImage;

/// Bilinear sample of an 8-bit image; `None` outside the pixel grid.
#[inline]
pub fn bilinear_u8(img: &GrayImage, x: f32, y: f32) -> Option<f32> {
    let (w, h) = img.dimensions();
    if !(x >= 0.0 && y >= 0.0 && x <= (w - 1) as f32 && y <= (h - 1) as f32) {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let px = |xx: u32, yy: u32| img.get_pixel(xx, yy).0[0] as f32;
    let top = px(x0, y0) * (1.0 - fx) + px(x1, y0) * fx;
    let bottom = px(x0, y1) * (1.0 - fx) + px(x1, y1) * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}

/// Bilinear sample of a float image with border clamping.
#[inline]
pub fn bilinear_f32(img: &FloatImage, x: f32, y: f32) -> f32 {
    let (w, h) = img.dimensions();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let px = |xx: u32, yy: u32| img.get_pixel(xx, yy).0[0];
    let top = px(x0, y0) * (1.0 - fx) + px(x1, y0) * fx;
    let bottom = px(x0, y1) * (1.0 - fx) + px(x1, y1) * fx;
    top * (1.0 - fy) + bottom * fy
}

pub fn to_float(img: &GrayImage) -> FloatImage {
    FloatImage::from_fn(img.width(), img.height(), |x, y| {
        image::Luma([img.get_pixel(x, y).0[0] as f32])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilinear_interpolates_and_rejects_outside() {
        let img = GrayImage::from_raw(2, 2, vec![0, 100, 100, 200]).unwrap();
        assert_eq!(bilinear_u8(&img, 0.5, 0.5), Some(100.0));
        assert_eq!(bilinear_u8(&img, 1.0, 0.0), Some(100.0));
        assert_eq!(bilinear_u8(&img, -0.1, 0.0), None);
        assert_eq!(bilinear_u8(&img, 0.0, 1.5), None);

        let f = to_float(&img);
        assert_eq!(bilinear_f32(&f, 0.5, 0.0), 50.0);
        assert_eq!(bilinear_f32(&f, 5.0, 5.0), 200.0);
    }
}
