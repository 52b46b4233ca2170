//! Placement specification for artwork positioning
//!
//! Positions and sizes are in template pixels. The artwork's top-left corner
//! lands at (`x`, `y`) after it is resized to `width` x `height` and rotated.
//! A perspective quad replaces that simple placement entirely.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::{EngineResult, MockupError};

/// Largest accepted artwork edge and position magnitude in pixels
pub const MAX_DIMENSION: u32 = 16_384;

/// A point in template pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Point { x, y }
    }
}

/// Destination corners for a perspective placement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub top_left: Point,
    pub top_right: Point,
    pub bottom_right: Point,
    pub bottom_left: Point,
}

impl Quad {
    /// Corners in clockwise order starting top-left
    pub fn corners(&self) -> [Point; 4] {
        [self.top_left, self.top_right, self.bottom_right, self.bottom_left]
    }

    pub fn from_corners(corners: [Point; 4]) -> Self {
        Quad {
            top_left: corners[0],
            top_right: corners[1],
            bottom_right: corners[2],
            bottom_left: corners[3],
        }
    }

    /// Reject quads a homography cannot map onto
    pub fn validate(&self) -> EngineResult<()> {
        let corners = self.corners();
        if corners.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(MockupError::InvalidGeometry(
                "perspective corner is not finite".to_string(),
            ));
        }

        for i in 0..4 {
            for j in (i + 1)..4 {
                let (a, b) = (corners[i], corners[j]);
                if (a.x - b.x).abs() < 0.5 && (a.y - b.y).abs() < 0.5 {
                    return Err(MockupError::InvalidGeometry(format!(
                        "perspective corners {} and {} coincide",
                        i, j
                    )));
                }
            }
        }

        // Shoelace area; near-zero means the corners are collinear.
        let area = corners
            .iter()
            .zip(corners.iter().cycle().skip(1))
            .map(|(a, b)| a.x * b.y - b.x * a.y)
            .sum::<f32>()
            / 2.0;
        if area.abs() < 1.0 {
            return Err(MockupError::InvalidGeometry(
                "perspective quad has no area".to_string(),
            ));
        }

        Ok(())
    }
}

impl FromStr for Quad {
    type Err = String;

    /// Parses `x1,y1,x2,y2,x3,y3,x4,y4` (top-left, top-right, bottom-right, bottom-left)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|v| v.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid perspective coordinate: {}", e))?;

        if values.len() != 8 {
            return Err(format!(
                "perspective needs 8 comma-separated values, got {}",
                values.len()
            ));
        }

        Ok(Quad::from_corners([
            Point::new(values[0], values[1]),
            Point::new(values[2], values[3]),
            Point::new(values[4], values[5]),
            Point::new(values[6], values[7]),
        ]))
    }
}

/// Where and how the artwork is placed on the template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementSpec {
    /// Left edge of the placed artwork in template pixels
    pub x: i32,

    /// Top edge of the placed artwork in template pixels
    pub y: i32,

    /// Target artwork width before rotation
    pub width: u32,

    /// Target artwork height before rotation
    pub height: u32,

    /// Clockwise rotation in degrees, any value (normalised modulo 360)
    #[serde(default)]
    pub rotation: f64,

    /// Perspective destination corners; overrides position, size and rotation
    #[serde(default)]
    pub perspective: Option<Quad>,
}

impl PlacementSpec {
    /// Create a new placement specification
    pub fn new(x: i32, y: i32, width: u32, height: u32, rotation: f64) -> Self {
        PlacementSpec {
            x,
            y,
            width,
            height,
            rotation,
            perspective: None,
        }
    }

    pub fn with_perspective(mut self, quad: Quad) -> Self {
        self.perspective = Some(quad);
        self
    }

    /// Validate the placement specification
    pub fn validate(&self) -> EngineResult<()> {
        if let Some(quad) = &self.perspective {
            return quad.validate();
        }

        if self.width == 0 || self.height == 0 {
            return Err(MockupError::InvalidGeometry(format!(
                "artwork size {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(MockupError::InvalidGeometry(format!(
                "artwork size {}x{} exceeds {}",
                self.width, self.height, MAX_DIMENSION
            )));
        }
        if self.x.unsigned_abs() > MAX_DIMENSION || self.y.unsigned_abs() > MAX_DIMENSION {
            return Err(MockupError::InvalidGeometry(format!(
                "position ({}, {}) is out of range",
                self.x, self.y
            )));
        }
        if !self.rotation.is_finite() {
            return Err(MockupError::InvalidGeometry(format!(
                "rotation {} is not finite",
                self.rotation
            )));
        }

        Ok(())
    }

    /// Rotation in [0, 360)
    pub fn normalized_rotation(&self) -> f64 {
        normalize_degrees(self.rotation)
    }
}

/// Map any finite angle into [0, 360)
pub fn normalize_degrees(degrees: f64) -> f64 {
    let normalized = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_placement() {
        let spec = PlacementSpec::new(400, 500, 300, 300, 0.0);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_invalid_geometry() {
        let mut spec = PlacementSpec::new(0, 0, 0, 10, 0.0);
        assert!(matches!(spec.validate(), Err(MockupError::InvalidGeometry(_))));

        spec.width = 10;
        spec.rotation = f64::NAN;
        assert!(matches!(spec.validate(), Err(MockupError::InvalidGeometry(_))));

        spec.rotation = 0.0;
        spec.x = -(MAX_DIMENSION as i32) - 1;
        assert!(matches!(spec.validate(), Err(MockupError::InvalidGeometry(_))));
    }

    #[test]
    fn test_rotation_normalization() {
        assert_eq!(normalize_degrees(360.0), 0.0);
        assert_eq!(normalize_degrees(-90.0), 270.0);
        assert_eq!(normalize_degrees(725.0), 5.0);
        assert_eq!(PlacementSpec::new(0, 0, 1, 1, -360.0).normalized_rotation(), 0.0);
    }

    #[test]
    fn test_quad_parse_and_validate() {
        let quad: Quad = "100,0,1700,0,1700,4000,100,3000".parse().unwrap();
        assert_eq!(quad.bottom_left, Point::new(100.0, 3000.0));
        assert!(quad.validate().is_ok());

        assert!("1,2,3".parse::<Quad>().is_err());

        let collapsed: Quad = "5,5,5,5,5,5,5,5".parse().unwrap();
        assert!(matches!(collapsed.validate(), Err(MockupError::InvalidGeometry(_))));

        let line: Quad = "0,0,10,0,20,0,30,0".parse().unwrap();
        assert!(matches!(line.validate(), Err(MockupError::InvalidGeometry(_))));
    }
}
