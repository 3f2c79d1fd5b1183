//! Multi-frame (GIF) resize
//!
//! Frames are decoded as palette indices so each one can be re-quantized to
//! its own palette after scaling. Delay, disposal, transparency and the loop
//! count are carried over unchanged. Each frame's sub-rectangle is mapped onto
//! the resized logical screen so partial frames stay aligned.

use super::composite::scale_bilinear;
use super::TransformError;
use bytes::Bytes;
use gif::{ColorOutput, DecodeOptions, Encoder, Frame, Repeat};
use image::{Rgba, RgbaImage};
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Cursor;

/// A decoded GIF: logical screen, palettes and raw indexed frames
#[derive(Debug, Clone)]
pub struct AnimatedImage {
    pub width: u16,
    pub height: u16,
    pub global_palette: Option<Vec<u8>>,
    pub repeat: Repeat,
    pub frames: Vec<Frame<'static>>,
}

impl AnimatedImage {
    /// Decode every frame. Fails for anything that is not a GIF with at least one frame.
    pub fn decode(data: &[u8]) -> Result<Self, gif::DecodingError> {
        let mut options = DecodeOptions::new();
        options.set_color_output(ColorOutput::Indexed);

        let mut decoder = options.read_info(Cursor::new(data))?;
        let width = decoder.width();
        let height = decoder.height();
        let global_palette = decoder.global_palette().map(<[u8]>::to_vec);

        let mut frames = Vec::new();
        while let Some(frame) = decoder.read_next_frame()? {
            frames.push(frame.clone());
        }

        if frames.is_empty() {
            return Err(gif::DecodingError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "GIF contains no frames",
            )));
        }

        Ok(Self {
            width,
            height,
            global_palette,
            repeat: decoder.repeat(),
            frames,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Resize every frame to a `width` x `height` logical screen
    pub fn resize(&self, width: u32, height: u32) -> Result<Self, TransformError> {
        let target_w = u16::try_from(width).map_err(|_| {
            TransformError::BadParameters(format!("width {width} exceeds GIF limit"))
        })?;
        let target_h = u16::try_from(height).map_err(|_| {
            TransformError::BadParameters(format!("height {height} exceeds GIF limit"))
        })?;

        let scale_x = f64::from(target_w) / f64::from(self.width.max(1));
        let scale_y = f64::from(target_h) / f64::from(self.height.max(1));

        let frames = self
            .frames
            .iter()
            .enumerate()
            .map(|(index, frame)| {
                let palette = frame
                    .palette
                    .as_deref()
                    .or(self.global_palette.as_deref())
                    .ok_or_else(|| {
                        TransformError::Decode(format!("frame {index} has no color palette"))
                    })?;

                Ok(resize_frame(frame, palette, scale_x, scale_y, target_w, target_h))
            })
            .collect::<Result<Vec<_>, TransformError>>()?;

        Ok(Self {
            width: target_w,
            height: target_h,
            global_palette: self.global_palette.clone(),
            repeat: self.repeat,
            frames,
        })
    }

    pub fn encode(&self) -> Result<Bytes, TransformError> {
        let mut buffer = Vec::new();
        {
            let global = self.global_palette.as_deref().unwrap_or(&[]);
            let mut encoder = Encoder::new(&mut buffer, self.width, self.height, global)
                .map_err(|e| TransformError::Encode(format!("Failed to start GIF: {e}")))?;

            encoder
                .set_repeat(self.repeat)
                .map_err(|e| TransformError::Encode(format!("Failed to write loop count: {e}")))?;

            for frame in &self.frames {
                encoder
                    .write_frame(frame)
                    .map_err(|e| TransformError::Encode(format!("Failed to write frame: {e}")))?;
            }
        }

        Ok(Bytes::from(buffer))
    }
}

/// Map `[start, end)` on the source screen to the target screen.
/// The result always covers at least one pixel inside `[0, limit)`.
fn scale_span(start: u16, len: u16, scale: f64, limit: u16) -> (u16, u16) {
    let limit = limit.max(1);
    let begin = ((f64::from(start) * scale).floor() as u32).min(u32::from(limit) - 1);
    let end = ((f64::from(start) + f64::from(len)) * scale).ceil() as u32;
    let end = end.clamp(begin + 1, u32::from(limit));
    (begin as u16, (end - begin) as u16)
}

fn resize_frame(
    frame: &Frame<'static>,
    palette: &[u8],
    scale_x: f64,
    scale_y: f64,
    target_w: u16,
    target_h: u16,
) -> Frame<'static> {
    let (left, width) = scale_span(frame.left, frame.width, scale_x, target_w);
    let (top, height) = scale_span(frame.top, frame.height, scale_y, target_h);

    let rgba = expand_indexed(frame, palette);
    let scaled = scale_bilinear(&rgba, u32::from(width), u32::from(height));
    let buffer = quantize(&scaled, palette, frame.transparent);

    Frame {
        delay: frame.delay,
        dispose: frame.dispose,
        transparent: frame.transparent,
        needs_user_input: frame.needs_user_input,
        top,
        left,
        width,
        height,
        interlaced: false,
        palette: frame.palette.clone(),
        buffer: Cow::Owned(buffer),
    }
}

/// Palette indices to RGBA; the transparent index (and out-of-range indices) become clear pixels
fn expand_indexed(frame: &Frame<'_>, palette: &[u8]) -> RgbaImage {
    let width = u32::from(frame.width);
    let height = u32::from(frame.height);
    let mut image = RgbaImage::new(width, height);

    for (i, &index) in frame.buffer.iter().enumerate() {
        let x = (i as u32) % width.max(1);
        let y = (i as u32) / width.max(1);
        if y >= height {
            break;
        }

        if frame.transparent == Some(index) {
            continue;
        }

        let base = usize::from(index) * 3;
        if let Some(rgb) = palette.get(base..base + 3) {
            image.put_pixel(x, y, Rgba([rgb[0], rgb[1], rgb[2], 255]));
        }
    }

    image
}

/// Nearest-color mapping back onto `palette`
fn quantize(image: &RgbaImage, palette: &[u8], transparent: Option<u8>) -> Vec<u8> {
    let colors: Vec<(u8, [u8; 3])> = palette
        .chunks_exact(3)
        .enumerate()
        .filter(|(i, _)| transparent != Some(*i as u8))
        .map(|(i, rgb)| (i as u8, [rgb[0], rgb[1], rgb[2]]))
        .collect();

    let mut cache: HashMap<[u8; 3], u8> = HashMap::new();

    image
        .pixels()
        .map(|pixel| {
            let [r, g, b, a] = pixel.0;

            if a < 128 {
                if let Some(index) = transparent {
                    return index;
                }
            }

            *cache
                .entry([r, g, b])
                .or_insert_with(|| nearest_color(&colors, [r, g, b]))
        })
        .collect()
}

fn nearest_color(colors: &[(u8, [u8; 3])], target: [u8; 3]) -> u8 {
    colors
        .iter()
        .min_by_key(|(_, rgb)| {
            rgb.iter()
                .zip(target.iter())
                .map(|(&a, &b)| {
                    let d = i32::from(a) - i32::from(b);
                    (d * d) as u32
                })
                .sum::<u32>()
        })
        .map(|(index, _)| *index)
        .unwrap_or(0)
}
