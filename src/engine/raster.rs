//! Raster primitives shared by every pipeline stage
//!
//! `RasterBuffer` wraps an RGBA8 image, `AlphaMask` holds the printable-area
//! opacity field and `ScratchArena` accounts the scratch memory a single
//! request holds while it runs.

use image::{imageops, DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
use tracing::debug;
use uuid::Uuid;

use super::error::{EngineResult, MockupError};

/// Displacement-neutral gray (no offset)
pub const NEUTRAL_GRAY: u8 = 127;

/// Lighting-neutral gray (hardlight identity)
pub const MID_GRAY: u8 = 128;

/// Rec.601 luma of an 8-bit RGB triple
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}

/// Allocate a zeroed byte buffer, reporting allocation failure instead of aborting
fn try_alloc(width: u32, height: u32, channels: usize) -> EngineResult<Vec<u8>> {
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(channels))
        .ok_or_else(|| {
            MockupError::ResourceExhausted(format!("{}x{} buffer size overflows", width, height))
        })?;

    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|e| {
        MockupError::ResourceExhausted(format!("{}x{} scratch buffer: {}", width, height, e))
    })?;
    data.resize(len, 0);
    Ok(data)
}

/// In-memory RGBA8 image
#[derive(Debug, Clone, PartialEq)]
pub struct RasterBuffer {
    pixels: RgbaImage,
}

impl RasterBuffer {
    /// Wrap an already decoded image
    pub fn new(pixels: RgbaImage) -> Self {
        RasterBuffer { pixels }
    }

    /// Fully transparent buffer
    pub fn try_blank(width: u32, height: u32) -> EngineResult<Self> {
        let data = try_alloc(width, height, 4)?;
        let pixels = RgbaImage::from_raw(width, height, data).ok_or_else(|| {
            MockupError::CompositionFailure(format!("{}x{} buffer has wrong length", width, height))
        })?;
        Ok(RasterBuffer { pixels })
    }

    /// Buffer filled with a single colour
    pub fn try_filled(width: u32, height: u32, color: Rgba<u8>) -> EngineResult<Self> {
        let mut buffer = Self::try_blank(width, height)?;
        for pixel in buffer.pixels.pixels_mut() {
            *pixel = color;
        }
        Ok(buffer)
    }

    /// Build from raw interleaved 8-bit pixel data
    ///
    /// Accepts gray, gray+alpha, RGB and RGBA layouts.
    pub fn from_raw(width: u32, height: u32, channels: u8, data: &[u8]) -> EngineResult<Self> {
        if width == 0 || height == 0 {
            return Err(MockupError::UnsupportedFormat(format!(
                "empty raster {}x{}",
                width, height
            )));
        }
        if !(1..=4).contains(&channels) {
            return Err(MockupError::UnsupportedFormat(format!(
                "{} channels per pixel (expected 1-4)",
                channels
            )));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(MockupError::UnsupportedFormat(format!(
                "{}x{}x{} raster needs {} bytes, got {}",
                width,
                height,
                channels,
                expected,
                data.len()
            )));
        }

        let mut buffer = Self::try_blank(width, height)?;
        for (dst, src) in buffer
            .pixels
            .pixels_mut()
            .zip(data.chunks_exact(channels as usize))
        {
            *dst = match src {
                [v] => Rgba([*v, *v, *v, 255]),
                [v, a] => Rgba([*v, *v, *v, *a]),
                [r, g, b] => Rgba([*r, *g, *b, 255]),
                [r, g, b, a] => Rgba([*r, *g, *b, *a]),
                _ => unreachable!("chunks_exact yields 1-4 channels"),
            };
        }
        Ok(buffer)
    }

    /// Scale colour by alpha in place, for resampling without dark fringes
    pub fn premultiply(&mut self) {
        for p in self.pixels.pixels_mut() {
            let a = p.0[3] as u32;
            for c in &mut p.0[..3] {
                *c = ((*c as u32 * a + 127) / 255) as u8;
            }
        }
    }

    /// Undo [`RasterBuffer::premultiply`]; fully transparent pixels become (0, 0, 0, 0)
    pub fn unpremultiply(&mut self) {
        for p in self.pixels.pixels_mut() {
            let a = p.0[3] as u32;
            if a == 0 {
                *p = Rgba([0, 0, 0, 0]);
                continue;
            }
            for c in &mut p.0[..3] {
                *c = ((*c as u32 * 255 + a / 2) / a).min(255) as u8;
            }
        }
    }

    /// Convert a decoded image of any colour type
    pub fn from_dynamic(image: &DynamicImage) -> EngineResult<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(MockupError::UnsupportedFormat(format!(
                "empty image {}x{}",
                image.width(),
                image.height()
            )));
        }
        Ok(RasterBuffer::new(image.to_rgba8()))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut RgbaImage {
        &mut self.pixels
    }

    pub fn into_inner(self) -> RgbaImage {
        self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.pixels.get_pixel(x, y)
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.as_raw().len()
    }

    /// Fail with `DimensionMismatch` unless this buffer is `expected` sized
    pub fn ensure_dimensions(&self, expected: (u32, u32), stage: &'static str) -> EngineResult<()> {
        check_dimensions(expected, self.dimensions(), stage)
    }

    pub fn is_fully_opaque(&self) -> bool {
        self.pixels.pixels().all(|p| p.0[3] == 255)
    }

    pub fn to_dynamic(&self) -> DynamicImage {
        DynamicImage::ImageRgba8(self.pixels.clone())
    }
}

pub(crate) fn check_dimensions(
    expected: (u32, u32),
    actual: (u32, u32),
    stage: &'static str,
) -> EngineResult<()> {
    if expected != actual {
        return Err(MockupError::DimensionMismatch {
            stage,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Printable-area opacity field in [0, 1], stored as 8-bit gray
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaMask {
    opacity: GrayImage,
}

impl AlphaMask {
    /// Opacity is `luma(rgb) * alpha`: white opaque pixels are printable
    pub fn from_raster(raster: &RasterBuffer) -> Self {
        let (width, height) = raster.dimensions();
        let opacity = GrayImage::from_fn(width, height, |x, y| {
            let [r, g, b, a] = raster.pixel(x, y).0;
            let value = luma(r, g, b) as u32 * a as u32;
            Luma([((value + 127) / 255) as u8])
        });
        AlphaMask { opacity }
    }

    pub fn from_gray(opacity: GrayImage) -> Self {
        AlphaMask { opacity }
    }

    /// Mask that lets everything through
    pub fn opaque(width: u32, height: u32) -> Self {
        AlphaMask {
            opacity: GrayImage::from_pixel(width, height, Luma([255])),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.opacity.dimensions()
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.opacity
    }

    /// Raw 8-bit opacity
    pub fn value(&self, x: u32, y: u32) -> u8 {
        self.opacity.get_pixel(x, y).0[0]
    }

    /// Opacity in [0, 1]
    pub fn opacity(&self, x: u32, y: u32) -> f32 {
        self.value(x, y) as f32 / 255.0
    }

    pub fn is_fully_opaque(&self) -> bool {
        self.opacity.pixels().all(|p| p.0[0] == 255)
    }

    /// Resample to `width` x `height`, returning the mask unchanged if it already fits
    pub fn conform_to(self, width: u32, height: u32) -> Self {
        if self.dimensions() == (width, height) {
            return self;
        }
        debug!(
            from = ?self.dimensions(),
            to = ?(width, height),
            "Resampling mask to template size"
        );
        AlphaMask {
            opacity: imageops::resize(&self.opacity, width, height, imageops::FilterType::Triangle),
        }
    }

    pub fn byte_len(&self) -> usize {
        self.opacity.as_raw().len()
    }
}

/// Accounts the scratch buffers one request holds
///
/// Buffers are owned by the pipeline stage values; the arena only tracks their
/// footprint against a budget so an oversized request fails with
/// `ResourceExhausted` before it exhausts the process.
#[derive(Debug)]
pub struct ScratchArena {
    request_id: Uuid,
    budget: usize,
    live: Vec<(&'static str, usize)>,
    peak: usize,
}

impl ScratchArena {
    pub fn new(request_id: Uuid, budget: usize) -> Self {
        ScratchArena {
            request_id,
            budget,
            live: Vec::new(),
            peak: 0,
        }
    }

    pub fn in_use(&self) -> usize {
        self.live.iter().map(|(_, bytes)| bytes).sum()
    }

    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Record a new scratch buffer, failing if the budget would be exceeded
    pub fn charge(&mut self, label: &'static str, bytes: usize) -> EngineResult<()> {
        let in_use = self.in_use();
        if in_use.saturating_add(bytes) > self.budget {
            return Err(MockupError::ResourceExhausted(format!(
                "{} needs {} bytes with {} of {} in use",
                label, bytes, in_use, self.budget
            )));
        }
        self.live.push((label, bytes));
        self.peak = self.peak.max(in_use + bytes);
        Ok(())
    }

    /// Fail unless `bytes` of short-lived intermediates fit next to what is in use
    ///
    /// Nothing is recorded except the peak; call before allocating.
    pub fn ensure_available(&mut self, label: &'static str, bytes: usize) -> EngineResult<()> {
        let in_use = self.in_use();
        if in_use.saturating_add(bytes) > self.budget {
            return Err(MockupError::ResourceExhausted(format!(
                "{} intermediates need {} bytes with {} of {} in use",
                label, bytes, in_use, self.budget
            )));
        }
        self.peak = self.peak.max(in_use + bytes);
        Ok(())
    }

    /// Forget a buffer that has been dropped or handed off
    pub fn release(&mut self, label: &'static str) {
        if let Some(pos) = self.live.iter().position(|(l, _)| *l == label) {
            self.live.swap_remove(pos);
        }
    }
}

impl Drop for ScratchArena {
    fn drop(&mut self) {
        debug!(
            request_id = %self.request_id,
            released_bytes = self.in_use(),
            peak_bytes = self.peak,
            "Released request scratch buffers"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_expands_layouts() {
        let gray = RasterBuffer::from_raw(2, 1, 1, &[10, 20]).unwrap();
        assert_eq!(gray.pixel(1, 0), Rgba([20, 20, 20, 255]));

        let gray_alpha = RasterBuffer::from_raw(1, 1, 2, &[30, 40]).unwrap();
        assert_eq!(gray_alpha.pixel(0, 0), Rgba([30, 30, 30, 40]));

        let rgb = RasterBuffer::from_raw(1, 1, 3, &[1, 2, 3]).unwrap();
        assert_eq!(rgb.pixel(0, 0), Rgba([1, 2, 3, 255]));
    }

    #[test]
    fn test_from_raw_rejects_bad_layouts() {
        let five = RasterBuffer::from_raw(1, 1, 5, &[0; 5]);
        assert!(matches!(five, Err(MockupError::UnsupportedFormat(_))));

        let short = RasterBuffer::from_raw(2, 2, 4, &[0; 15]);
        assert!(matches!(short, Err(MockupError::UnsupportedFormat(_))));

        let empty = RasterBuffer::from_raw(0, 3, 4, &[]);
        assert!(matches!(empty, Err(MockupError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_mask_opacity_uses_luma_and_alpha() {
        let mut raster = RasterBuffer::try_blank(3, 1).unwrap();
        raster.pixels_mut().put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        raster.pixels_mut().put_pixel(1, 0, Rgba([255, 255, 255, 0]));
        raster.pixels_mut().put_pixel(2, 0, Rgba([0, 0, 0, 255]));

        let mask = AlphaMask::from_raster(&raster);
        assert_eq!(mask.value(0, 0), 255);
        assert_eq!(mask.value(1, 0), 0);
        assert_eq!(mask.value(2, 0), 0);
    }

    #[test]
    fn test_mask_conform_resamples() {
        let mask = AlphaMask::opaque(10, 10).conform_to(20, 5);
        assert_eq!(mask.dimensions(), (20, 5));
        assert!(mask.is_fully_opaque());
    }

    #[test]
    fn test_arena_budget() {
        let mut arena = ScratchArena::new(Uuid::new_v4(), 100);
        arena.charge("a", 60).unwrap();
        assert!(matches!(
            arena.charge("b", 60),
            Err(MockupError::ResourceExhausted(_))
        ));
        arena.release("a");
        arena.charge("b", 60).unwrap();
        assert_eq!(arena.in_use(), 60);
        assert_eq!(arena.peak(), 60);
    }

    #[test]
    fn test_arena_ensure_available_checks_without_charging() {
        let mut arena = ScratchArena::new(Uuid::new_v4(), 100);
        arena.charge("maps", 40).unwrap();
        arena.ensure_available("placement", 60).unwrap();
        assert_eq!(arena.in_use(), 40);
        assert_eq!(arena.peak(), 100);
        assert!(matches!(
            arena.ensure_available("placement", 61),
            Err(MockupError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn test_premultiply_round_trip() {
        let mut raster = RasterBuffer::try_blank(3, 1).unwrap();
        raster.pixels_mut().put_pixel(0, 0, Rgba([255, 0, 0, 32]));
        raster.pixels_mut().put_pixel(1, 0, Rgba([200, 100, 50, 255]));
        raster.pixels_mut().put_pixel(2, 0, Rgba([90, 90, 90, 0]));

        raster.premultiply();
        assert_eq!(raster.pixel(0, 0), Rgba([32, 0, 0, 32]));
        assert_eq!(raster.pixel(1, 0), Rgba([200, 100, 50, 255]));

        raster.unpremultiply();
        assert_eq!(raster.pixel(0, 0), Rgba([255, 0, 0, 32]));
        assert_eq!(raster.pixel(1, 0), Rgba([200, 100, 50, 255]));
        assert_eq!(raster.pixel(2, 0), Rgba([0, 0, 0, 0]));
    }
}
