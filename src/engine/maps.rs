//! Lighting, displacement and adjustment maps
//!
//! All maps are derived from a template photo and its printable-area mask.
//! The builder is a pure function of its inputs: the same template, mask and
//! parameters always produce bit-identical maps.

use image::{GrayImage, Luma, Rgba};
use imageproc::filter::gaussian_blur_f32;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::blend::{to_channel, BlendMode};
use super::error::{EngineResult, MockupError};
use super::raster::{check_dimensions, luma, AlphaMask, RasterBuffer, MID_GRAY, NEUTRAL_GRAY};

/// Fraction of full scale subtracted from the normalized template
pub const DEFAULT_BRIGHTNESS_DELTA: f32 = 0.30;

/// Gaussian sigma for the displacement map
pub const DEFAULT_BLUR_SIGMA: f32 = 10.0;

/// Fabric reference colour the adjustment map is normalised against (#f1f1f1)
pub const DEFAULT_ADJUSTMENT_REFERENCE: u8 = 0xf1;

/// Map derivation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapParams {
    pub brightness_delta: f32,
    pub blur_sigma: f32,
    pub adjustment_reference: u8,
}

impl Default for MapParams {
    fn default() -> Self {
        MapParams {
            brightness_delta: DEFAULT_BRIGHTNESS_DELTA,
            blur_sigma: DEFAULT_BLUR_SIGMA,
            adjustment_reference: DEFAULT_ADJUSTMENT_REFERENCE,
        }
    }
}

impl MapParams {
    pub fn validate(&self) -> EngineResult<()> {
        if !self.brightness_delta.is_finite() || !(0.0..=1.0).contains(&self.brightness_delta) {
            return Err(MockupError::CompositionFailure(format!(
                "brightness delta {} outside [0, 1]",
                self.brightness_delta
            )));
        }
        if !self.blur_sigma.is_finite() || self.blur_sigma < 0.0 {
            return Err(MockupError::CompositionFailure(format!(
                "blur sigma {} must be finite and non-negative",
                self.blur_sigma
            )));
        }
        Ok(())
    }

    /// Stable byte encoding, used for cache keys
    pub fn to_bytes(&self) -> [u8; 9] {
        let mut bytes = [0u8; 9];
        bytes[..4].copy_from_slice(&self.brightness_delta.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.blur_sigma.to_le_bytes());
        bytes[8] = self.adjustment_reference;
        bytes
    }
}

/// The three maps one request renders with
#[derive(Debug, Clone, PartialEq)]
pub struct MapSet {
    pub lighting: RasterBuffer,
    pub displacement: RasterBuffer,
    pub adjustment: RasterBuffer,
}

impl MapSet {
    /// Maps under which every blend stage is (near) identity
    pub fn neutral(width: u32, height: u32) -> EngineResult<Self> {
        Ok(MapSet {
            lighting: RasterBuffer::try_filled(width, height, Rgba([MID_GRAY, MID_GRAY, MID_GRAY, 255]))?,
            displacement: RasterBuffer::try_filled(
                width,
                height,
                Rgba([NEUTRAL_GRAY, NEUTRAL_GRAY, NEUTRAL_GRAY, 255]),
            )?,
            adjustment: RasterBuffer::try_filled(width, height, Rgba([255, 255, 255, 255]))?,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.lighting.dimensions()
    }

    /// Every map must match the template it will be applied to
    pub fn ensure_dimensions(&self, expected: (u32, u32)) -> EngineResult<()> {
        self.lighting.ensure_dimensions(expected, "lighting map")?;
        self.displacement.ensure_dimensions(expected, "displacement map")?;
        self.adjustment.ensure_dimensions(expected, "adjustment map")
    }

    pub fn byte_len(&self) -> usize {
        self.lighting.byte_len() + self.displacement.byte_len() + self.adjustment.byte_len()
    }
}

/// Derives map sets from template/mask pairs
#[derive(Debug, Clone, Default)]
pub struct MapBuilder {
    params: MapParams,
}

impl MapBuilder {
    pub fn new(params: MapParams) -> Self {
        MapBuilder { params }
    }

    pub fn params(&self) -> &MapParams {
        &self.params
    }

    /// Build all three maps; the mask is resampled to the template when sizes differ
    #[instrument(skip_all, fields(width = template.width(), height = template.height()))]
    pub fn build(&self, template: &RasterBuffer, mask: &AlphaMask) -> EngineResult<MapSet> {
        self.params.validate()?;

        let (width, height) = template.dimensions();
        let mask = mask.clone().conform_to(width, height);

        let normalized = normalized_luminance(template, &mask)?;
        let shading = self.shading_base(&normalized)?;
        let lighting = lighting_map(&shading)?;
        let displacement = self.displacement_map(&shading)?;
        let adjustment = self.adjustment_map(template, &mask)?;

        debug!(
            brightness_delta = self.params.brightness_delta,
            blur_sigma = self.params.blur_sigma,
            "Derived lighting, displacement and adjustment maps"
        );

        Ok(MapSet {
            lighting,
            displacement,
            adjustment,
        })
    }

    /// Darken the normalized map by the brightness delta and flatten it onto neutral gray
    pub fn shading_base(&self, normalized: &RasterBuffer) -> EngineResult<RasterBuffer> {
        let (width, height) = normalized.dimensions();
        let delta = self.params.brightness_delta * 255.0;
        let mut output = RasterBuffer::try_blank(width, height)?;

        for (out, n) in output.pixels_mut().pixels_mut().zip(normalized.pixels().pixels()) {
            let alpha = n.0[3] as f32 / 255.0;
            let darkened = (n.0[0] as f32 - delta).max(0.0);
            let flattened = darkened * alpha + NEUTRAL_GRAY as f32 * (1.0 - alpha);
            let v = to_channel(flattened, "shading map")?;
            *out = Rgba([v, v, v, 255]);
        }

        Ok(output)
    }

    /// Blur the shading base so pixel offsets vary smoothly
    pub fn displacement_map(&self, shading: &RasterBuffer) -> EngineResult<RasterBuffer> {
        let (width, height) = shading.dimensions();
        let gray = GrayImage::from_fn(width, height, |x, y| Luma([shading.pixel(x, y).0[0]]));

        let blurred = if self.params.blur_sigma > 0.0 {
            gaussian_blur_f32(&gray, self.params.blur_sigma)
        } else {
            gray
        };

        let mut output = RasterBuffer::try_blank(width, height)?;
        for (out, g) in output.pixels_mut().pixels_mut().zip(blurred.pixels()) {
            let v = g.0[0];
            *out = Rgba([v, v, v, 255]);
        }
        Ok(output)
    }

    /// Template divided by the fabric reference colour inside the mask
    pub fn adjustment_map(&self, template: &RasterBuffer, mask: &AlphaMask) -> EngineResult<RasterBuffer> {
        check_dimensions(template.dimensions(), mask.dimensions(), "adjustment map")?;

        let reference = self.params.adjustment_reference;
        let (width, height) = template.dimensions();
        let mut output = RasterBuffer::try_blank(width, height)?;

        for (x, y, out) in output.pixels_mut().enumerate_pixels_mut() {
            let t = template.pixel(x, y);
            let m = mask.opacity(x, y);
            let mut result = [255u8; 4];
            for i in 0..3 {
                let divided = BlendMode::DivideSrc.blend_channel(t.0[i], reference);
                let mixed = divided * m + t.0[i] as f32 * (1.0 - m);
                result[i] = to_channel(mixed, "adjustment map")?;
            }
            *out = Rgba(result);
        }

        Ok(output)
    }
}

/// Grayscale template carrying the mask as its alpha
pub fn normalized_luminance(template: &RasterBuffer, mask: &AlphaMask) -> EngineResult<RasterBuffer> {
    check_dimensions(template.dimensions(), mask.dimensions(), "normalized luminance")?;

    let (width, height) = template.dimensions();
    let mut output = RasterBuffer::try_blank(width, height)?;
    for (x, y, out) in output.pixels_mut().enumerate_pixels_mut() {
        let [r, g, b, _] = template.pixel(x, y).0;
        let v = luma(r, g, b);
        *out = Rgba([v, v, v, mask.value(x, y)]);
    }
    Ok(output)
}

/// Lighten the shading base against mid-gray
pub fn lighting_map(shading: &RasterBuffer) -> EngineResult<RasterBuffer> {
    let (width, height) = shading.dimensions();
    let mut output = RasterBuffer::try_blank(width, height)?;
    for (out, g) in output.pixels_mut().pixels_mut().zip(shading.pixels().pixels()) {
        let mut result = [255u8; 4];
        for i in 0..3 {
            result[i] = to_channel(BlendMode::Lighten.blend_channel(g.0[i], MID_GRAY), "lighting map")?;
        }
        *out = Rgba(result);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(width: u32, height: u32) -> RasterBuffer {
        let mut buffer = RasterBuffer::try_blank(width, height).unwrap();
        for (x, y, p) in buffer.pixels_mut().enumerate_pixels_mut() {
            let v = ((x * 7 + y * 3) % 256) as u8;
            *p = Rgba([v, v.wrapping_add(20), v / 2, 255]);
        }
        buffer
    }

    #[test]
    fn test_maps_match_template_dimensions() {
        let t = template(64, 48);
        let maps = MapBuilder::default().build(&t, &AlphaMask::opaque(64, 48)).unwrap();
        assert_eq!(maps.lighting.dimensions(), (64, 48));
        assert_eq!(maps.displacement.dimensions(), (64, 48));
        assert_eq!(maps.adjustment.dimensions(), (64, 48));
    }

    #[test]
    fn test_mask_of_other_size_is_resampled() {
        let t = template(40, 30);
        let maps = MapBuilder::default().build(&t, &AlphaMask::opaque(10, 10)).unwrap();
        assert!(maps.ensure_dimensions((40, 30)).is_ok());
    }

    #[test]
    fn test_build_is_deterministic() {
        let t = template(32, 32);
        let mask = AlphaMask::opaque(32, 32);
        let builder = MapBuilder::default();
        assert_eq!(builder.build(&t, &mask).unwrap(), builder.build(&t, &mask).unwrap());
    }

    #[test]
    fn test_shading_base_outside_mask_is_neutral() {
        let t = template(8, 8);
        let clear = AlphaMask::from_gray(GrayImage::new(8, 8));
        let normalized = normalized_luminance(&t, &clear).unwrap();
        let shading = MapBuilder::default().shading_base(&normalized).unwrap();
        assert!(shading.pixels().pixels().all(|p| p.0 == [NEUTRAL_GRAY, NEUTRAL_GRAY, NEUTRAL_GRAY, 255]));
    }

    #[test]
    fn test_shading_subtracts_brightness_delta() {
        let t = RasterBuffer::try_filled(4, 4, Rgba([200, 200, 200, 255])).unwrap();
        let normalized = normalized_luminance(&t, &AlphaMask::opaque(4, 4)).unwrap();
        let shading = MapBuilder::default().shading_base(&normalized).unwrap();
        // 200 - 0.3 * 255 = 123.5
        assert!((shading.pixel(0, 0).0[0] as i32 - 124).abs() <= 1);

        let lighting = lighting_map(&shading).unwrap();
        assert_eq!(lighting.pixel(0, 0).0, [MID_GRAY, MID_GRAY, MID_GRAY, 255]);
    }

    #[test]
    fn test_adjustment_map_is_white_on_reference_fabric() {
        let reference = DEFAULT_ADJUSTMENT_REFERENCE;
        let t = RasterBuffer::try_filled(4, 4, Rgba([reference, reference, reference, 255])).unwrap();
        let adjustment = MapBuilder::default()
            .adjustment_map(&t, &AlphaMask::opaque(4, 4))
            .unwrap();
        assert!(adjustment.pixels().pixels().all(|p| p.0 == [255, 255, 255, 255]));
    }

    #[test]
    fn test_adjustment_map_outside_mask_keeps_template() {
        let t = RasterBuffer::try_filled(2, 2, Rgba([90, 60, 30, 255])).unwrap();
        let clear = AlphaMask::from_gray(GrayImage::new(2, 2));
        let adjustment = MapBuilder::default().adjustment_map(&t, &clear).unwrap();
        assert_eq!(adjustment.pixel(1, 1).0, [90, 60, 30, 255]);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let builder = MapBuilder::new(MapParams {
            brightness_delta: 1.5,
            ..MapParams::default()
        });
        let t = template(4, 4);
        assert!(matches!(
            builder.build(&t, &AlphaMask::opaque(4, 4)),
            Err(MockupError::CompositionFailure(_))
        ));
    }

    #[test]
    fn test_neutral_set_dimensions() {
        let maps = MapSet::neutral(7, 9).unwrap();
        assert_eq!(maps.dimensions(), (7, 9));
        assert!(maps.ensure_dimensions((9, 7)).is_err());
    }
}
