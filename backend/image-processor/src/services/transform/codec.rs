//! Still-image decode and encode

use super::TransformError;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, ImageOutputFormat};
use std::io::Cursor;

/// An encoded asset and the file extension matching its format
#[derive(Debug, Clone)]
pub struct Encoded {
    pub data: Bytes,
    pub extension: &'static str,
}

/// Decode with format auto-detection
pub fn decode_still(data: &[u8]) -> Result<(DynamicImage, ImageFormat), TransformError> {
    let format = image::guess_format(data)
        .map_err(|e| TransformError::Decode(format!("Unrecognized image format: {e}")))?;

    let image = image::load_from_memory_with_format(data, format)
        .map_err(|e| TransformError::Decode(format!("Failed to decode {format:?} image: {e}")))?;

    Ok((image, format))
}

/// Output format and extension for a detected source format.
/// Formats without a dedicated encoder path fall back to PNG.
pub fn output_format(format: ImageFormat, jpeg_quality: u8) -> (ImageOutputFormat, &'static str) {
    match format {
        ImageFormat::Jpeg => (ImageOutputFormat::Jpeg(jpeg_quality), "jpeg"),
        ImageFormat::Gif => (ImageOutputFormat::Gif, "gif"),
        _ => (ImageOutputFormat::Png, "png"),
    }
}

/// Encode `image` in the format `source_format` maps to
pub fn encode_still(
    image: DynamicImage,
    source_format: ImageFormat,
    jpeg_quality: u8,
) -> Result<Encoded, TransformError> {
    let (output, extension) = output_format(source_format, jpeg_quality);

    // JPEG has no alpha channel
    let image = match output {
        ImageOutputFormat::Jpeg(_) => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => image,
    };

    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, output)
        .map_err(|e| TransformError::Encode(format!("Failed to encode {extension}: {e}")))?;

    Ok(Encoded {
        data: Bytes::from(cursor.into_inner()),
        extension,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn sample() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(6, 4, Rgba([50, 100, 150, 255])))
    }

    #[test]
    fn test_unknown_formats_fall_back_to_png() {
        assert_eq!(output_format(ImageFormat::Bmp, 90).1, "png");
        assert_eq!(output_format(ImageFormat::WebP, 90).1, "png");
        assert_eq!(output_format(ImageFormat::Jpeg, 90).1, "jpeg");
        assert_eq!(output_format(ImageFormat::Gif, 90).1, "gif");
    }

    #[test]
    fn test_jpeg_encode_decodes_back() {
        let encoded = encode_still(sample(), ImageFormat::Jpeg, 90).unwrap();
        assert_eq!(encoded.extension, "jpeg");

        let (decoded, format) = decode_still(&encoded.data).unwrap();
        assert_eq!(format, ImageFormat::Jpeg);
        assert_eq!((decoded.width(), decoded.height()), (6, 4));
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let err = decode_still(b"definitely not an image").unwrap_err();
        assert!(matches!(err, TransformError::Decode(_)));
    }
}
