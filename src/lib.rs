//! R-Mockup-Press
//!
//! Photorealistic print mockups: artwork is placed on a product photo, bent
//! along the fabric with a displacement map, relit with a lighting map, tinted
//! with an adjustment map and composited through the printable-area mask.

pub mod config;
pub mod domain;
pub mod engine;
pub mod sources;

pub use domain::{PlacementSpec, Quad, RequestSpec};
pub use engine::{EngineResult, ErrorKind, MockupError, MockupRequest, Pipeline, PipelineOptions, WorkerPool};
