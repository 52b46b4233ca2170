//! Artwork placement: border, resize, rotate, translate or perspective warp
//!
//! The output is always a template-sized canvas that is transparent outside
//! the placed artwork.

use image::{imageops, Rgba, RgbaImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use tracing::debug;

use crate::domain::{normalize_degrees, PlacementSpec, Quad};

use super::error::{EngineResult, MockupError};
use super::raster::RasterBuffer;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Place the artwork on a transparent canvas of `canvas` size
pub fn place_artwork(
    artwork: &RasterBuffer,
    placement: &PlacementSpec,
    canvas: (u32, u32),
) -> EngineResult<RasterBuffer> {
    placement.validate()?;

    // Transparent frame to fade into at the edges; resampled premultiplied
    let mut bordered = add_border(artwork, 1)?;
    bordered.premultiply();

    if let Some(quad) = &placement.perspective {
        debug!(quad = ?quad, "Placing artwork with perspective warp");
        let mut placed = warp_perspective(&bordered, quad, canvas)?;
        placed.unpremultiply();
        return Ok(placed);
    }

    let resized = resize_exact(&bordered, placement.width, placement.height);
    drop(bordered);
    let rotated = rotate_expanded(&resized, placement.rotation)?;
    drop(resized);

    debug!(
        x = placement.x,
        y = placement.y,
        placed_width = rotated.width(),
        placed_height = rotated.height(),
        rotation = placement.normalized_rotation(),
        "Placing artwork"
    );

    let mut placed = translate_onto(&rotated, placement.x, placement.y, canvas)?;
    placed.unpremultiply();
    Ok(placed)
}

/// Peak bytes `place_artwork` allocates for an artwork of `artwork` size
///
/// Counts the bordered copy, the resized and rotated intermediates and the
/// output canvas, all RGBA8.
pub fn placement_footprint(artwork: (u32, u32), placement: &PlacementSpec, canvas: (u32, u32)) -> usize {
    let rgba = |w: u32, h: u32| w as u64 * h as u64 * 4;
    let bordered = rgba(artwork.0.saturating_add(2), artwork.1.saturating_add(2));
    let canvas = rgba(canvas.0, canvas.1);

    let total = if placement.perspective.is_some() {
        bordered + canvas
    } else {
        let (rot_w, rot_h) = rotated_bounds(placement.width, placement.height, placement.rotation);
        bordered + rgba(placement.width, placement.height) + rgba(rot_w, rot_h) + canvas
    };
    usize::try_from(total).unwrap_or(usize::MAX)
}

/// Surround the image with a `size` pixel transparent frame
pub fn add_border(image: &RasterBuffer, size: u32) -> EngineResult<RasterBuffer> {
    let (width, height) = image.dimensions();
    let mut framed = RasterBuffer::try_blank(width + 2 * size, height + 2 * size)?;
    imageops::replace(framed.pixels_mut(), image.pixels(), size as i64, size as i64);
    Ok(framed)
}

/// Resample to exactly `width` x `height` with a triangle (bilinear) filter
pub fn resize_exact(image: &RasterBuffer, width: u32, height: u32) -> RasterBuffer {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    RasterBuffer::new(imageops::resize(
        image.pixels(),
        width,
        height,
        imageops::FilterType::Triangle,
    ))
}

/// Bounding box of a `width` x `height` image rotated by `degrees`
pub fn rotated_bounds(width: u32, height: u32, degrees: f64) -> (u32, u32) {
    let normalized = normalize_degrees(degrees);
    if normalized == 0.0 || normalized == 180.0 {
        return (width, height);
    }
    if normalized == 90.0 || normalized == 270.0 {
        return (height, width);
    }

    let (sin, cos) = normalized.to_radians().sin_cos();
    let (w, h) = (width as f64, height as f64);
    let bounds_w = (w * cos.abs() + h * sin.abs()).ceil() as u32;
    let bounds_h = (w * sin.abs() + h * cos.abs()).ceil() as u32;
    (bounds_w.max(1), bounds_h.max(1))
}

/// Rotate clockwise about the centre, growing the canvas to fit
///
/// Multiples of 90 degrees are exact pixel rotations; 0 and 360 return the input.
pub fn rotate_expanded(image: &RasterBuffer, degrees: f64) -> EngineResult<RasterBuffer> {
    if !degrees.is_finite() {
        return Err(MockupError::InvalidGeometry(format!("rotation {} is not finite", degrees)));
    }

    let normalized = normalize_degrees(degrees);
    if normalized == 0.0 {
        return Ok(image.clone());
    }
    if normalized == 90.0 {
        return Ok(RasterBuffer::new(imageops::rotate90(image.pixels())));
    }
    if normalized == 180.0 {
        return Ok(RasterBuffer::new(imageops::rotate180(image.pixels())));
    }
    if normalized == 270.0 {
        return Ok(RasterBuffer::new(imageops::rotate270(image.pixels())));
    }

    let (width, height) = image.dimensions();
    let (out_w, out_h) = rotated_bounds(width, height, normalized);

    let projection = Projection::translate(out_w as f32 / 2.0, out_h as f32 / 2.0)
        * Projection::rotate(normalized.to_radians() as f32)
        * Projection::translate(-(width as f32) / 2.0, -(height as f32) / 2.0);

    let mut output = RasterBuffer::try_blank(out_w, out_h)?;
    warp_into(
        image.pixels(),
        &projection,
        Interpolation::Bilinear,
        TRANSPARENT,
        output.pixels_mut(),
    );
    Ok(output)
}

/// Copy the image onto a transparent canvas with its top-left at (`x`, `y`)
pub fn translate_onto(image: &RasterBuffer, x: i32, y: i32, canvas: (u32, u32)) -> EngineResult<RasterBuffer> {
    let mut output = RasterBuffer::try_blank(canvas.0, canvas.1)?;
    imageops::replace(output.pixels_mut(), image.pixels(), x as i64, y as i64);
    Ok(output)
}

/// Map the image's corners onto `quad` with a planar homography
pub fn warp_perspective(image: &RasterBuffer, quad: &Quad, canvas: (u32, u32)) -> EngineResult<RasterBuffer> {
    quad.validate()?;

    let (width, height) = image.dimensions();
    let (w, h) = (width as f32, height as f32);
    let from = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
    let to = quad.corners().map(|p| (p.x, p.y));

    let projection = Projection::from_control_points(from, to).ok_or_else(|| {
        MockupError::InvalidGeometry(format!("no homography maps the artwork onto {:?}", quad))
    })?;

    let mut output = RasterBuffer::try_blank(canvas.0, canvas.1)?;
    warp_into(
        image.pixels(),
        &projection,
        Interpolation::Bilinear,
        TRANSPARENT,
        output.pixels_mut(),
    );
    Ok(output)
}

/// Smallest rectangle containing every pixel with non-zero alpha
pub fn opaque_bounds(image: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, p) in image.enumerate_pixels() {
        if p.0[3] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    bounds
}
