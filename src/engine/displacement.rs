//! Displacement mapping algorithm
//!
//! Warps the placed artwork so it follows fabric wrinkles and folds.
//!
//! The displacement map's red channel drives horizontal offsets and its green
//! channel vertical offsets:
//! - Black (0) = sample from up/left
//! - Gray (127/128) = no displacement
//! - White (255) = sample from down/right

use std::fmt;
use std::str::FromStr;

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use super::blend::to_channel;
use super::error::{EngineResult, MockupError};
use super::raster::{check_dimensions, RasterBuffer};

/// Default maximum offset in pixels for each axis
pub const DEFAULT_DISPLACEMENT_SCALE: f32 = 20.0;

/// Full-swing offsets in pixels along each axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplacementScale {
    pub x: f32,
    pub y: f32,
}

impl DisplacementScale {
    pub fn new(x: f32, y: f32) -> Self {
        DisplacementScale { x, y }
    }
}

impl Default for DisplacementScale {
    fn default() -> Self {
        DisplacementScale::new(DEFAULT_DISPLACEMENT_SCALE, DEFAULT_DISPLACEMENT_SCALE)
    }
}

impl fmt::Display for DisplacementScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}

impl FromStr for DisplacementScale {
    type Err = String;

    /// Parses `SX` or `SXxSY`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<f32>()
                .map_err(|e| format!("invalid displacement scale '{}': {}", v, e))
        };
        match s.split_once(['x', 'X']) {
            Some((sx, sy)) => Ok(DisplacementScale::new(parse(sx)?, parse(sy)?)),
            None => {
                let v = parse(s)?;
                Ok(DisplacementScale::new(v, v))
            }
        }
    }
}

/// Apply displacement mapping to the placed artwork
///
/// # Arguments
/// * `source` - The artwork canvas to displace
/// * `displacement_map` - Offset field, same size as `source`
/// * `scale` - Offset in pixels at full black/white swing
///
/// # Returns
/// A new buffer; samples that fall outside `source` are transparent.
pub fn apply_displacement(
    source: &RasterBuffer,
    displacement_map: &RasterBuffer,
    scale: DisplacementScale,
) -> EngineResult<RasterBuffer> {
    check_dimensions(source.dimensions(), displacement_map.dimensions(), "displacement")?;
    if !scale.x.is_finite() || !scale.y.is_finite() {
        return Err(MockupError::InvalidGeometry(format!(
            "displacement scale {} is not finite",
            scale
        )));
    }

    let (width, height) = source.dimensions();
    let mut output = RasterBuffer::try_blank(width, height)?;

    for (x, y, out) in output.pixels_mut().enumerate_pixels_mut() {
        let offset = displacement_map.pixel(x, y);

        // Channel value 0-255 normalized to -0.5..0.5
        let dx = (offset.0[0] as f32 / 255.0 - 0.5) * scale.x;
        let dy = (offset.0[1] as f32 / 255.0 - 0.5) * scale.y;

        let sample = bilinear_sample(source.pixels(), x as f32 + dx, y as f32 + dy);
        *out = Rgba([
            to_channel(sample[0], "displacement")?,
            to_channel(sample[1], "displacement")?,
            to_channel(sample[2], "displacement")?,
            to_channel(sample[3], "displacement")?,
        ]);
    }

    Ok(output)
}

/// Bilinear interpolation with premultiplied alpha; outside pixels are transparent
fn bilinear_sample(image: &RgbaImage, x: f32, y: f32) -> [f32; 4] {
    let (width, height) = image.dimensions();

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let taps = [
        (x0, y0, (1.0 - fx) * (1.0 - fy)),
        (x0 + 1.0, y0, fx * (1.0 - fy)),
        (x0, y0 + 1.0, (1.0 - fx) * fy),
        (x0 + 1.0, y0 + 1.0, fx * fy),
    ];

    let mut alpha = 0.0f32;
    let mut color = [0.0f32; 3];
    for (tx, ty, weight) in taps {
        if weight == 0.0 || tx < 0.0 || ty < 0.0 || tx >= width as f32 || ty >= height as f32 {
            continue;
        }
        let p = image.get_pixel(tx as u32, ty as u32);
        let a = p.0[3] as f32 * weight;
        alpha += a;
        for i in 0..3 {
            color[i] += p.0[i] as f32 * a;
        }
    }

    if alpha <= 0.0 {
        return [0.0; 4];
    }
    [color[0] / alpha, color[1] / alpha, color[2] / alpha, alpha]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::raster::NEUTRAL_GRAY;

    fn horizontal_gradient(width: u32, height: u32) -> RasterBuffer {
        let mut buffer = RasterBuffer::try_blank(width, height).unwrap();
        for (x, _, p) in buffer.pixels_mut().enumerate_pixels_mut() {
            let v = (x * 255 / (width - 1)) as u8;
            *p = Rgba([v, 255 - v, 128, 255]);
        }
        buffer
    }

    #[test]
    fn test_bilinear_sample_center() {
        let mut img = RgbaImage::new(2, 2);
        img.put_pixel(0, 0, Rgba([100, 100, 100, 255]));
        img.put_pixel(1, 0, Rgba([200, 200, 200, 255]));
        img.put_pixel(0, 1, Rgba([100, 100, 100, 255]));
        img.put_pixel(1, 1, Rgba([200, 200, 200, 255]));

        let result = bilinear_sample(&img, 0.5, 0.5);
        // Should be average of all 4 pixels = 150
        assert!((result[0] - 150.0).abs() < 0.5);
        assert!((result[3] - 255.0).abs() < 0.5);
    }

    #[test]
    fn test_bilinear_sample_outside_is_transparent() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255]));
        assert_eq!(bilinear_sample(&img, -5.0, 0.0), [0.0; 4]);
        let edge = bilinear_sample(&img, 1.5, 0.0);
        assert!((edge[3] - 127.5).abs() < 0.5);
        // Premultiplied sampling keeps the colour of the covered half
        assert!((edge[0] - 10.0).abs() < 0.5);
    }

    #[test]
    fn test_neutral_map_is_near_identity() {
        let source = horizontal_gradient(64, 16);
        let map = RasterBuffer::try_filled(64, 16, Rgba([NEUTRAL_GRAY, NEUTRAL_GRAY, NEUTRAL_GRAY, 255])).unwrap();
        let displaced = apply_displacement(&source, &map, DisplacementScale::default()).unwrap();

        let total: u64 = source
            .pixels()
            .as_raw()
            .iter()
            .zip(displaced.pixels().as_raw())
            .map(|(a, b)| (*a as i32 - *b as i32).unsigned_abs() as u64)
            .sum();
        let average = total as f64 / source.byte_len() as f64;
        assert!(average <= 1.0, "average error {}", average);
    }

    #[test]
    fn test_split_map_shears_at_center() {
        let (width, height) = (256, 64);
        let source = horizontal_gradient(width, height);
        let mut map = RasterBuffer::try_blank(width, height).unwrap();
        for (x, _, p) in map.pixels_mut().enumerate_pixels_mut() {
            let v = if x < width / 2 { 0 } else { 255 };
            *p = Rgba([v, v, v, 255]);
        }

        let displaced = apply_displacement(&source, &map, DisplacementScale::default()).unwrap();
        let y = 32;
        // Left half samples 10px to the left, right half 10px to the right
        assert_eq!(displaced.pixel(100, y).0[0], source.pixel(90, y).0[0]);
        assert_eq!(displaced.pixel(200, y).0[0], source.pixel(210, y).0[0]);

        let left = displaced.pixel(width / 2 - 1, y).0[0] as i32;
        let right = displaced.pixel(width / 2, y).0[0] as i32;
        assert!(right - left >= 20, "jump {} -> {}", left, right);
    }

    #[test]
    fn test_out_of_bounds_is_transparent() {
        let source = RasterBuffer::try_filled(8, 8, Rgba([255, 0, 0, 255])).unwrap();
        let map = RasterBuffer::try_filled(8, 8, Rgba([255, 255, 0, 255])).unwrap();
        let displaced = apply_displacement(&source, &map, DisplacementScale::new(40.0, 40.0)).unwrap();
        assert!(displaced.pixels().pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn test_rejects_mismatched_map() {
        let source = horizontal_gradient(8, 8);
        let map = RasterBuffer::try_blank(8, 9).unwrap();
        assert!(matches!(
            apply_displacement(&source, &map, DisplacementScale::default()),
            Err(MockupError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_parse_scale() {
        assert_eq!("20x10".parse::<DisplacementScale>().unwrap(), DisplacementScale::new(20.0, 10.0));
        assert_eq!("5".parse::<DisplacementScale>().unwrap(), DisplacementScale::new(5.0, 5.0));
        assert!("ax3".parse::<DisplacementScale>().is_err());
    }
}
