//! Serialisable request shape
//!
//! Field names follow the mockup tooling's JSON (`logoWidth`, `positionX`, ...)
//! and the older `templateUrl` / `maskUrl` / `logoUrl` spellings are accepted.

use serde::{Deserialize, Serialize};

use crate::engine::{EngineResult, MockupError};

use super::placement::{PlacementSpec, Quad};

/// A mockup request before any source is loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSpec {
    /// Product photo (path or http(s) URL)
    #[serde(alias = "templateUrl")]
    pub template: String,

    /// Printable-area mask (path or URL)
    #[serde(alias = "maskUrl")]
    pub mask: String,

    /// Artwork to print (path or URL)
    #[serde(alias = "logoUrl", alias = "logo")]
    pub artwork: String,

    pub logo_width: u32,
    pub logo_height: u32,
    pub position_x: i32,
    pub position_y: i32,

    /// Clockwise degrees, any signed value
    #[serde(default)]
    pub rotation: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perspective: Option<Quad>,

    /// Precomputed displacement map; used only together with the other two maps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displacement_map: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighting_map: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjustment_map: Option<String>,
}

impl RequestSpec {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| MockupError::UnsupportedFormat(format!("invalid request JSON: {}", e)))
    }

    pub fn placement(&self) -> PlacementSpec {
        let placement = PlacementSpec::new(
            self.position_x,
            self.position_y,
            self.logo_width,
            self.logo_height,
            self.rotation as f64,
        );
        match self.perspective {
            Some(quad) => placement.with_perspective(quad),
            None => placement,
        }
    }

    /// Displacement, lighting and adjustment map sources when all three are given
    ///
    /// A partial set is rejected so a request never mixes derived and supplied maps.
    pub fn map_sources(&self) -> EngineResult<Option<[&str; 3]>> {
        match (&self.displacement_map, &self.lighting_map, &self.adjustment_map) {
            (Some(d), Some(l), Some(a)) => Ok(Some([d.as_str(), l.as_str(), a.as_str()])),
            (None, None, None) => Ok(None),
            _ => Err(MockupError::UnsupportedFormat(
                "precomputed maps need displacement, lighting and adjustment together".to_string(),
            )),
        }
    }
}
