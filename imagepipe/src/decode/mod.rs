//! Image decoding collaborators.

use image::imageops::FilterType;
use image::RgbaImage;

use crate::error::DecodeError;

/// Turns encoded bytes into pixels.
///
/// Decoders run on the blocking thread pool and must not block on async
/// work.
pub trait ImageDecoding: Send + Sync + 'static {
    /// Decodes a complete image.
    fn decode(&self, data: &[u8]) -> Result<RgbaImage, DecodeError>;

    /// Decodes a preview from a prefix of the image.
    ///
    /// Returns `Ok(None)` when the prefix is not enough for a preview yet.
    /// Only called when progressive decoding is enabled.
    fn decode_partial(&self, data: &[u8]) -> Result<Option<RgbaImage>, DecodeError> {
        let _ = data;
        Ok(None)
    }
}

/// Decoder backed by the `image` crate's format detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultImageDecoder;

impl ImageDecoding for DefaultImageDecoder {
    fn decode(&self, data: &[u8]) -> Result<RgbaImage, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Unsupported { len: 0 });
        }
        let image = image::load_from_memory(data)?;
        Ok(image.to_rgba8())
    }
}

/// Scales `image` down so its longest side is at most `max_pixels`.
///
/// Images already within bounds are returned unchanged.
pub fn thumbnail(image: RgbaImage, max_pixels: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if longest <= max_pixels || longest == 0 {
        return image;
    }

    let scale = max_pixels as f64 / longest as f64;
    let new_width = ((width as f64 * scale).round() as u32).max(1);
    let new_height = ((height as f64 * scale).round() as u32).max(1);
    image::imageops::resize(&image, new_width, new_height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba};
    use std::io::Cursor;

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decodes_png() {
        let decoded = DefaultImageDecoder.decode(&encode_png(3, 2)).unwrap();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(0, 0), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_rejects_garbage() {
        let err = DefaultImageDecoder.decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, DecodeError::Image(_)));
    }

    #[test]
    fn test_rejects_empty() {
        let err = DefaultImageDecoder.decode(&[]).unwrap_err();
        assert!(matches!(err, DecodeError::Unsupported { len: 0 }));
    }

    #[test]
    fn test_default_partial_decode_waits_for_more() {
        let png = encode_png(4, 4);
        assert!(DefaultImageDecoder.decode_partial(&png[..10]).unwrap().is_none());
    }

    #[test]
    fn test_thumbnail_keeps_aspect_ratio() {
        let image = RgbaImage::new(200, 100);
        assert_eq!(thumbnail(image, 50).dimensions(), (50, 25));
    }

    #[test]
    fn test_thumbnail_never_upscales() {
        let image = RgbaImage::new(20, 10);
        assert_eq!(thumbnail(image, 50).dimensions(), (20, 10));
    }
}
