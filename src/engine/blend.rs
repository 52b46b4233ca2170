//! Blend modes and copy-opacity compositing
//!
//! Every mode has a per-channel formula on 8-bit values. Lighting and
//! adjustment blends keep the artwork's own alpha (copy-opacity) so shading is
//! only ever applied where the print has ink.

use std::fmt;
use std::str::FromStr;

use image::Rgba;
use serde::{Deserialize, Serialize};

use super::error::{EngineResult, MockupError};
use super::raster::{check_dimensions, RasterBuffer, MID_GRAY};

/// Closed set of blend operators used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    HardLight,
    Overlay,
    Multiply,
    Lighten,
    DivideSrc,
    Over,
}

impl BlendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlendMode::HardLight => "hardlight",
            BlendMode::Overlay => "overlay",
            BlendMode::Multiply => "multiply",
            BlendMode::Lighten => "lighten",
            BlendMode::DivideSrc => "divide_src",
            BlendMode::Over => "over",
        }
    }

    /// Blend one channel of `layer` onto `base`
    pub fn blend_channel(self, base: u8, layer: u8) -> f32 {
        let b = base as f32;
        let l = layer as f32;
        match self {
            BlendMode::HardLight => {
                if layer < MID_GRAY {
                    2.0 * b * l / 255.0
                } else {
                    255.0 - 2.0 * (255.0 - b) * (255.0 - l) / 255.0
                }
            }
            BlendMode::Overlay => {
                if base < MID_GRAY {
                    2.0 * b * l / 255.0
                } else {
                    255.0 - 2.0 * (255.0 - b) * (255.0 - l) / 255.0
                }
            }
            BlendMode::Multiply => b * l / 255.0,
            BlendMode::Lighten => b.max(l),
            // dst / src
            BlendMode::DivideSrc => {
                if layer == 0 {
                    if base == 0 { 0.0 } else { 255.0 }
                } else {
                    (255.0 * b / l).min(255.0)
                }
            }
            BlendMode::Over => l,
        }
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlendMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "hardlight" => Ok(BlendMode::HardLight),
            "overlay" => Ok(BlendMode::Overlay),
            "multiply" => Ok(BlendMode::Multiply),
            "lighten" => Ok(BlendMode::Lighten),
            "dividesrc" => Ok(BlendMode::DivideSrc),
            "over" => Ok(BlendMode::Over),
            other => Err(format!("unknown blend mode '{}'", other)),
        }
    }
}

/// How the lighting map is applied to the artwork
///
/// Hardlight is the default; overlay keys on the artwork instead of the light
/// and gives visibly different results, so it is only used when asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightingMode {
    #[default]
    HardLight,
    Overlay,
}

impl LightingMode {
    pub fn blend_mode(&self) -> BlendMode {
        match self {
            LightingMode::HardLight => BlendMode::HardLight,
            LightingMode::Overlay => BlendMode::Overlay,
        }
    }
}

impl fmt::Display for LightingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.blend_mode().as_str())
    }
}

impl FromStr for LightingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<BlendMode>()? {
            BlendMode::HardLight => Ok(LightingMode::HardLight),
            BlendMode::Overlay => Ok(LightingMode::Overlay),
            other => Err(format!("'{}' is not a lighting mode (hardlight, overlay)", other)),
        }
    }
}

/// Round a blended channel back to 8 bits
pub(crate) fn to_channel(value: f32, stage: &str) -> EngineResult<u8> {
    if !value.is_finite() {
        return Err(MockupError::CompositionFailure(format!(
            "{} produced a non-finite channel value",
            stage
        )));
    }
    Ok(value.round().clamp(0.0, 255.0) as u8)
}

/// Blend `layer` onto `base` and keep `base`'s alpha
pub fn blend_copy_opacity(
    base: &RasterBuffer,
    layer: &RasterBuffer,
    mode: BlendMode,
    stage: &'static str,
) -> EngineResult<RasterBuffer> {
    check_dimensions(base.dimensions(), layer.dimensions(), stage)?;

    let (width, height) = base.dimensions();
    let mut output = RasterBuffer::try_blank(width, height)?;

    for ((out, b), l) in output
        .pixels_mut()
        .pixels_mut()
        .zip(base.pixels().pixels())
        .zip(layer.pixels().pixels())
    {
        let layer_alpha = l.0[3] as f32 / 255.0;
        let mut result = [0u8; 4];
        for i in 0..3 {
            let blended = mode.blend_channel(b.0[i], l.0[i]);
            let mixed = b.0[i] as f32 + (blended - b.0[i] as f32) * layer_alpha;
            result[i] = to_channel(mixed, stage)?;
        }
        result[3] = b.0[3];
        *out = Rgba(result);
    }

    Ok(output)
}

/// Apply the lighting map (highlights and shadows) to the artwork
pub fn apply_lighting(
    artwork: &RasterBuffer,
    lighting_map: &RasterBuffer,
    mode: LightingMode,
) -> EngineResult<RasterBuffer> {
    blend_copy_opacity(artwork, lighting_map, mode.blend_mode(), "lighting")
}

/// Apply the adjustment map (ambient colour cast) to the artwork
pub fn apply_adjustment(
    artwork: &RasterBuffer,
    adjustment_map: &RasterBuffer,
) -> EngineResult<RasterBuffer> {
    blend_copy_opacity(artwork, adjustment_map, BlendMode::Multiply, "adjustment")
}

/// Porter-Duff "over" for straight-alpha pixels, unrounded
pub(crate) fn over_pixel(src: &Rgba<u8>, dst: &Rgba<u8>) -> [f32; 4] {
    let sa = src.0[3] as f32 / 255.0;
    let da = dst.0[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);

    let mut result = [0.0f32; 4];
    if out_a <= 0.0 {
        return result;
    }
    for i in 0..3 {
        let sc = BlendMode::Over.blend_channel(dst.0[i], src.0[i]);
        result[i] = (sc * sa + dst.0[i] as f32 * da * (1.0 - sa)) / out_a;
    }
    result[3] = out_a * 255.0;
    result
}

/// Composite `src` over `dst`
pub fn over(src: &RasterBuffer, dst: &RasterBuffer) -> EngineResult<RasterBuffer> {
    check_dimensions(dst.dimensions(), src.dimensions(), "over")?;

    let (width, height) = dst.dimensions();
    let mut output = RasterBuffer::try_blank(width, height)?;
    for ((out, s), d) in output
        .pixels_mut()
        .pixels_mut()
        .zip(src.pixels().pixels())
        .zip(dst.pixels().pixels())
    {
        let v = over_pixel(s, d);
        *out = Rgba([
            to_channel(v[0], "over")?,
            to_channel(v[1], "over")?,
            to_channel(v[2], "over")?,
            to_channel(v[3], "over")?,
        ]);
    }
    Ok(output)
}
