//! Pixel-level helpers shared by the still and animated paths

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, Rgba32FImage, RgbaImage};

/// Bilinear scale to exactly `width` x `height`.
///
/// Interpolates premultiplied colour, so clear pixels never bleed their
/// (black) colour channels into the opaque pixels next to them.
pub fn scale_bilinear(source: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let mut linear: Rgba32FImage = DynamicImage::ImageRgba8(source.clone()).into_rgba32f();
    linear.pixels_mut().for_each(premultiply);

    let mut scaled = imageops::resize(&linear, width.max(1), height.max(1), FilterType::Triangle);
    scaled.pixels_mut().for_each(unpremultiply);

    DynamicImage::ImageRgba32F(scaled).into_rgba8()
}

/// Scale `source` onto a fresh transparent `width` x `height` canvas
pub fn scale_onto_transparent(source: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let scaled = scale_bilinear(source, width, height);
    let mut canvas = RgbaImage::new(scaled.width(), scaled.height());
    imageops::overlay(&mut canvas, &scaled, 0, 0);
    canvas
}

fn premultiply(pixel: &mut Rgba<f32>) {
    let alpha = pixel[3];
    for channel in &mut pixel.0[..3] {
        *channel *= alpha;
    }
}

fn unpremultiply(pixel: &mut Rgba<f32>) {
    let alpha = pixel[3];
    for channel in &mut pixel.0[..3] {
        *channel = if alpha > 0.0 {
            (*channel / alpha).min(1.0)
        } else {
            0.0
        };
    }
}
