//! Mockup generation engine
//!
//! This module contains the core mockup generation logic including:
//! - Map derivation (lighting, displacement, adjustment)
//! - Artwork placement and displacement mapping
//! - Blend modes and the final composite
//! - The staged pipeline and the worker pool that runs it

mod blend;
mod cache;
mod compositor;
mod displacement;
mod error;
mod geometry;
mod maps;
mod pipeline;
mod raster;
mod worker;

pub use blend::{apply_adjustment, apply_lighting, blend_copy_opacity, over, BlendMode, LightingMode};
pub use cache::MapCache;
pub use compositor::{
    composite_onto_template, encode, resize_to_width, EncodedMockup, OutputFormat, DEFAULT_OUTPUT_WIDTH,
};
pub use displacement::{apply_displacement, DisplacementScale, DEFAULT_DISPLACEMENT_SCALE};
pub use error::{EngineResult, ErrorKind, ErrorReport, MockupError};
pub use geometry::{opaque_bounds, place_artwork, rotate_expanded, rotated_bounds};
pub use maps::{
    lighting_map, normalized_luminance, MapBuilder, MapParams, MapSet, DEFAULT_ADJUSTMENT_REFERENCE,
    DEFAULT_BLUR_SIGMA, DEFAULT_BRIGHTNESS_DELTA,
};
pub use pipeline::{
    MockupOutput, MockupRequest, Pipeline, PipelineOptions, PipelineState, DEFAULT_SCRATCH_BUDGET,
};
pub use raster::{luma, AlphaMask, RasterBuffer, ScratchArena, MID_GRAY, NEUTRAL_GRAY};
pub use worker::WorkerPool;
