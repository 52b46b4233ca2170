//! Final compositing and output encoding
//!
//! Merges the processed artwork into the template through the printable-area
//! mask, resizes to the requested output width and encodes the result.

use std::io::Cursor;

use base64::Engine;
use bytes::Bytes;
use image::{imageops, DynamicImage, ImageOutputFormat, Rgba};
use tracing::debug;

use super::blend::{over_pixel, to_channel};
use super::error::{EngineResult, MockupError};
use super::raster::{check_dimensions, AlphaMask, RasterBuffer};

/// Default output width in pixels
pub const DEFAULT_OUTPUT_WIDTH: u32 = 800;

/// Composite the artwork over the template, limited to the mask
///
/// `out = over(artwork, template) * m + template * (1 - m)`; with a fully
/// opaque mask this is a plain Porter-Duff "over".
pub fn composite_onto_template(
    artwork: &RasterBuffer,
    template: &RasterBuffer,
    mask: &AlphaMask,
) -> EngineResult<RasterBuffer> {
    check_dimensions(template.dimensions(), artwork.dimensions(), "final composite")?;
    check_dimensions(template.dimensions(), mask.dimensions(), "final composite mask")?;

    let (width, height) = template.dimensions();
    let mut output = RasterBuffer::try_blank(width, height)?;

    for (x, y, out) in output.pixels_mut().enumerate_pixels_mut() {
        let a = artwork.pixel(x, y);
        let t = template.pixel(x, y);

        // Skip fully transparent pixels
        if a.0[3] == 0 {
            *out = t;
            continue;
        }

        let m = mask.opacity(x, y);
        let merged = over_pixel(&a, &t);
        let mut result = [0u8; 4];
        for i in 0..4 {
            let mixed = merged[i] * m + t.0[i] as f32 * (1.0 - m);
            result[i] = to_channel(mixed, "final composite")?;
        }
        *out = Rgba(result);
    }

    Ok(output)
}

/// Resize to `width`, keeping the aspect ratio
pub fn resize_to_width(image: &RasterBuffer, width: u32) -> EngineResult<RasterBuffer> {
    if width == 0 {
        return Err(MockupError::InvalidGeometry("output width must be positive".to_string()));
    }
    let (src_w, src_h) = image.dimensions();
    if src_w == width {
        return Ok(image.clone());
    }

    let (_, height) = output_dimensions((src_w, src_h), width);
    debug!(from = ?(src_w, src_h), to = ?(width, height), "Resizing composite to output width");

    Ok(RasterBuffer::new(imageops::resize(
        image.pixels(),
        width,
        height,
        imageops::FilterType::Lanczos3,
    )))
}

/// Size of a `source` image scaled to `width`, rounding the height
pub fn output_dimensions(source: (u32, u32), width: u32) -> (u32, u32) {
    let (src_w, src_h) = source;
    if src_w == 0 {
        return (width, 0);
    }
    let height = ((src_h as u64 * width as u64 + src_w as u64 / 2) / src_w as u64).clamp(1, u32::MAX as u64);
    (width, height as u32)
}

/// Encodings the output collaborator can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Jpeg { quality: u8 },
}

impl OutputFormat {
    /// Pick a format from a file extension, defaulting to PNG
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => OutputFormat::Jpeg { quality: 90 },
            _ => OutputFormat::Png,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg { .. } => "image/jpeg",
        }
    }
}

/// An encoded mockup ready to hand to a sink
#[derive(Debug, Clone)]
pub struct EncodedMockup {
    pub bytes: Bytes,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl EncodedMockup {
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// Encode a buffer; PNG keeps transparency, JPEG drops it
pub fn encode(image: &RasterBuffer, format: OutputFormat) -> EngineResult<EncodedMockup> {
    let (width, height) = image.dimensions();
    let mut buffer = Cursor::new(Vec::new());

    let result = match format {
        OutputFormat::Png => image.to_dynamic().write_to(&mut buffer, ImageOutputFormat::Png),
        OutputFormat::Jpeg { quality } => DynamicImage::ImageRgb8(image.to_dynamic().to_rgb8())
            .write_to(&mut buffer, ImageOutputFormat::Jpeg(quality)),
    };
    result.map_err(|e| MockupError::UnsupportedFormat(format!("encoding failed: {}", e)))?;

    let bytes = buffer.into_inner();
    debug!(width, height, bytes = bytes.len(), content_type = format.content_type(), "Encoded mockup");

    Ok(EncodedMockup {
        bytes: Bytes::from(bytes),
        content_type: format.content_type(),
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::blend::over;

    fn template(width: u32, height: u32) -> RasterBuffer {
        let mut buffer = RasterBuffer::try_blank(width, height).unwrap();
        for (x, y, p) in buffer.pixels_mut().enumerate_pixels_mut() {
            *p = Rgba([(x * 20) as u8, (y * 20) as u8, 90, 255]);
        }
        buffer
    }

    fn artwork(width: u32, height: u32) -> RasterBuffer {
        let mut buffer = RasterBuffer::try_blank(width, height).unwrap();
        for (x, y, p) in buffer.pixels_mut().enumerate_pixels_mut() {
            *p = Rgba([200, 10, (x * 25) as u8, ((x + y) * 14) as u8]);
        }
        buffer
    }

    #[test]
    fn test_opaque_mask_equals_plain_over() {
        let t = template(10, 10);
        let a = artwork(10, 10);
        let masked = composite_onto_template(&a, &t, &AlphaMask::opaque(10, 10)).unwrap();
        assert_eq!(masked, over(&a, &t).unwrap());
    }

    #[test]
    fn test_clear_mask_keeps_template() {
        let t = template(6, 6);
        let a = artwork(6, 6);
        let clear = AlphaMask::from_gray(image::GrayImage::new(6, 6));
        assert_eq!(composite_onto_template(&a, &t, &clear).unwrap(), t);
    }

    #[test]
    fn test_composite_rejects_mismatch() {
        let t = template(6, 6);
        let a = artwork(5, 6);
        assert!(matches!(
            composite_onto_template(&a, &t, &AlphaMask::opaque(6, 6)),
            Err(MockupError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_resize_to_width_keeps_aspect() {
        let t = RasterBuffer::try_filled(1000, 1200, Rgba([1, 2, 3, 255])).unwrap();
        let resized = resize_to_width(&t, 800).unwrap();
        assert_eq!(resized.dimensions(), (800, 960));
        assert!(resize_to_width(&t, 0).is_err());
        assert_eq!(output_dimensions((1000, 1200), 800), (800, 960));
        assert_eq!(output_dimensions((1000, 1), 10), (10, 1));
    }

    #[test]
    fn test_encode_png_and_data_url() {
        let t = template(4, 3);
        let encoded = encode(&t, OutputFormat::Png).unwrap();
        assert_eq!(encoded.content_type, "image/png");
        assert_eq!((encoded.width, encoded.height), (4, 3));
        assert!(encoded.to_data_url().starts_with("data:image/png;base64,"));

        let decoded = image::load_from_memory(&encoded.bytes).unwrap().to_rgba8();
        assert_eq!(&decoded, t.pixels());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(OutputFormat::from_extension("JPG"), OutputFormat::Jpeg { quality: 90 });
        assert_eq!(OutputFormat::from_extension("png"), OutputFormat::Png);
        assert_eq!(OutputFormat::from_extension("webp").content_type(), "image/png");
    }
}
