//! Mockup pipeline orchestrator
//!
//! Drives one request through a fixed sequence of stages:
//!
//! `Idle -> MapsReady -> ArtworkPlaced -> Displaced -> Relit -> Adjusted -> Composited -> Done`
//!
//! `Failed` is reachable from any non-terminal state. Stages never overlap and
//! cannot be skipped or reordered; a deadline is only checked between stages.
//! Every stage output is owned by the run, so an early return drops all
//! scratch buffers and the request's `ScratchArena` logs the release.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, info_span};
use uuid::Uuid;

use crate::domain::PlacementSpec;

use super::blend::{apply_adjustment, apply_lighting, LightingMode};
use super::cache::MapCache;
use super::compositor::{composite_onto_template, output_dimensions, resize_to_width, DEFAULT_OUTPUT_WIDTH};
use super::displacement::{apply_displacement, DisplacementScale};
use super::error::{EngineResult, MockupError};
use super::geometry::{place_artwork, placement_footprint};
use super::maps::{MapBuilder, MapParams, MapSet};
use super::raster::{AlphaMask, RasterBuffer, ScratchArena};

/// Default scratch budget per request (1 GiB)
pub const DEFAULT_SCRATCH_BUDGET: usize = 1 << 30;

/// Canvas-sized RGBA buffers the map builder holds at its peak
const MAP_BUILD_BUFFERS: usize = 5;

/// Pipeline states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PipelineState {
    Idle,
    MapsReady,
    ArtworkPlaced,
    Displaced,
    Relit,
    Adjusted,
    Composited,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::MapsReady => "maps_ready",
            PipelineState::ArtworkPlaced => "artwork_placed",
            PipelineState::Displaced => "displaced",
            PipelineState::Relit => "relit",
            PipelineState::Adjusted => "adjusted",
            PipelineState::Composited => "composited",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }

    /// The only state a successful stage may move to
    pub fn successor(&self) -> Option<PipelineState> {
        match self {
            PipelineState::Idle => Some(PipelineState::MapsReady),
            PipelineState::MapsReady => Some(PipelineState::ArtworkPlaced),
            PipelineState::ArtworkPlaced => Some(PipelineState::Displaced),
            PipelineState::Displaced => Some(PipelineState::Relit),
            PipelineState::Relit => Some(PipelineState::Adjusted),
            PipelineState::Adjusted => Some(PipelineState::Composited),
            PipelineState::Composited => Some(PipelineState::Done),
            PipelineState::Done | PipelineState::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        if next == PipelineState::Failed {
            return !self.is_terminal();
        }
        self.successor() == Some(next)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables shared by every request a pipeline runs
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub map_params: MapParams,
    pub displacement_scale: DisplacementScale,
    pub lighting_mode: LightingMode,
    pub output_width: u32,
    pub scratch_budget: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            map_params: MapParams::default(),
            displacement_scale: DisplacementScale::default(),
            lighting_mode: LightingMode::default(),
            output_width: DEFAULT_OUTPUT_WIDTH,
            scratch_budget: DEFAULT_SCRATCH_BUDGET,
        }
    }
}

/// Request for mockup generation
#[derive(Debug, Clone)]
pub struct MockupRequest {
    pub id: Uuid,
    pub template: RasterBuffer,
    pub mask: AlphaMask,
    pub artwork: RasterBuffer,
    pub placement: PlacementSpec,
    /// Overrides `PipelineOptions::output_width`
    pub output_width: Option<u32>,
    /// Precomputed maps; derived from template and mask when absent
    pub maps: Option<MapSet>,
    /// Return the map set alongside the image
    pub retain_maps: bool,
}

impl MockupRequest {
    pub fn new(
        template: RasterBuffer,
        mask: AlphaMask,
        artwork: RasterBuffer,
        placement: PlacementSpec,
    ) -> Self {
        MockupRequest {
            id: Uuid::new_v4(),
            template,
            mask,
            artwork,
            placement,
            output_width: None,
            maps: None,
            retain_maps: false,
        }
    }

    pub fn with_output_width(mut self, width: u32) -> Self {
        self.output_width = Some(width);
        self
    }

    pub fn with_maps(mut self, maps: MapSet) -> Self {
        self.maps = Some(maps);
        self
    }

    pub fn retaining_maps(mut self) -> Self {
        self.retain_maps = true;
        self
    }
}

/// Result of mockup generation
#[derive(Debug)]
pub struct MockupOutput {
    pub request_id: Uuid,
    pub image: RasterBuffer,
    pub maps: Option<MapSet>,
    pub elapsed: Duration,
    pub peak_scratch_bytes: usize,
}

/// One-shot driver for a single request
pub struct Pipeline<'a> {
    options: &'a PipelineOptions,
    cache: Option<&'a MapCache>,
    deadline: Option<Instant>,
    state: PipelineState,
    history: Vec<PipelineState>,
}

impl<'a> Pipeline<'a> {
    pub fn new(options: &'a PipelineOptions) -> Self {
        Pipeline {
            options,
            cache: None,
            deadline: None,
            state: PipelineState::Idle,
            history: Vec::new(),
        }
    }

    pub fn with_cache(mut self, cache: Option<&'a MapCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// States entered so far, in order
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    /// Run every stage for `request`
    ///
    /// Any failure moves the pipeline to `Failed` and is returned as-is; no
    /// partial output escapes.
    pub fn run(&mut self, request: MockupRequest) -> EngineResult<MockupOutput> {
        if self.state != PipelineState::Idle {
            return Err(MockupError::CompositionFailure(format!(
                "pipeline already used (state {})",
                self.state
            )));
        }

        let span = info_span!("mockup", request_id = %request.id);
        let _guard = span.enter();

        let request_id = request.id;
        let started = Instant::now();
        let mut arena = ScratchArena::new(request_id, self.options.scratch_budget);

        match self.drive(request, &mut arena) {
            Ok((image, maps)) => {
                let elapsed = started.elapsed();
                info!(
                    width = image.width(),
                    height = image.height(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    peak_scratch_bytes = arena.peak(),
                    "Mockup generation complete"
                );
                Ok(MockupOutput {
                    request_id,
                    image,
                    maps,
                    elapsed,
                    peak_scratch_bytes: arena.peak(),
                })
            }
            Err(e) => {
                error!(
                    stage = %self.state.successor().unwrap_or(self.state),
                    kind = %e.kind(),
                    error = %e,
                    "Mockup generation failed"
                );
                self.state = PipelineState::Failed;
                self.history.push(PipelineState::Failed);
                Err(e)
            }
        }
    }

    fn drive(
        &mut self,
        request: MockupRequest,
        arena: &mut ScratchArena,
    ) -> EngineResult<(RasterBuffer, Option<MapSet>)> {
        let MockupRequest {
            template,
            mask,
            artwork,
            placement,
            output_width,
            maps: provided_maps,
            retain_maps,
            ..
        } = request;

        let options = self.options;
        let cache = self.cache;
        let canvas = template.dimensions();
        let mask = mask.conform_to(canvas.0, canvas.1);
        let output_width = output_width.unwrap_or(options.output_width);

        let canvas_bytes = canvas.0 as usize * canvas.1 as usize * 4;

        let maps = self.advance(PipelineState::MapsReady, arena, |arena| {
            let maps = match provided_maps {
                Some(maps) => {
                    maps.ensure_dimensions(canvas)?;
                    maps
                }
                None => {
                    arena.ensure_available(
                        PipelineState::MapsReady.as_str(),
                        canvas_bytes.saturating_mul(MAP_BUILD_BUFFERS),
                    )?;
                    let builder = MapBuilder::new(options.map_params);
                    match cache {
                        Some(cache) => cache.get_or_build(&builder, &template, &mask)?,
                        None => builder.build(&template, &mask)?,
                    }
                }
            };
            Ok((maps.byte_len(), maps))
        })?;

        let placed = self.advance(PipelineState::ArtworkPlaced, arena, |arena| {
            placement.validate()?;
            arena.ensure_available(
                PipelineState::ArtworkPlaced.as_str(),
                placement_footprint(artwork.dimensions(), &placement, canvas),
            )?;
            let placed = place_artwork(&artwork, &placement, canvas)?;
            Ok((placed.byte_len(), placed))
        })?;
        drop(artwork);

        let displaced = self.advance(PipelineState::Displaced, arena, |arena| {
            let displaced = apply_displacement(&placed, &maps.displacement, options.displacement_scale)?;
            arena.release(PipelineState::ArtworkPlaced.as_str());
            Ok((displaced.byte_len(), displaced))
        })?;
        drop(placed);

        let relit = self.advance(PipelineState::Relit, arena, |arena| {
            let relit = apply_lighting(&displaced, &maps.lighting, options.lighting_mode)?;
            arena.release(PipelineState::Displaced.as_str());
            Ok((relit.byte_len(), relit))
        })?;
        drop(displaced);

        let adjusted = self.advance(PipelineState::Adjusted, arena, |arena| {
            let adjusted = apply_adjustment(&relit, &maps.adjustment)?;
            arena.release(PipelineState::Relit.as_str());
            Ok((adjusted.byte_len(), adjusted))
        })?;
        drop(relit);

        let composited = self.advance(PipelineState::Composited, arena, |arena| {
            let composited = composite_onto_template(&adjusted, &template, &mask)?;
            arena.release(PipelineState::Adjusted.as_str());
            Ok((composited.byte_len(), composited))
        })?;
        drop(adjusted);

        let image = self.advance(PipelineState::Done, arena, |arena| {
            let (out_w, out_h) = output_dimensions(composited.dimensions(), output_width);
            arena.ensure_available(
                PipelineState::Done.as_str(),
                (out_w as usize).saturating_mul(out_h as usize).saturating_mul(4),
            )?;
            let image = resize_to_width(&composited, output_width)?;
            arena.release(PipelineState::Composited.as_str());
            Ok((image.byte_len(), image))
        })?;

        let maps = if retain_maps { Some(maps) } else { None };
        Ok((image, maps))
    }

    /// Run one stage and move to `next`
    ///
    /// The closure returns the stage output together with its scratch
    /// footprint, which is charged to the arena before the transition commits.
    fn advance<T>(
        &mut self,
        next: PipelineState,
        arena: &mut ScratchArena,
        stage: impl FnOnce(&mut ScratchArena) -> EngineResult<(usize, T)>,
    ) -> EngineResult<T> {
        if !self.state.can_transition_to(next) {
            return Err(MockupError::CompositionFailure(format!(
                "illegal transition {} -> {}",
                self.state, next
            )));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(MockupError::Cancelled(next.to_string()));
            }
        }

        let started = Instant::now();
        let (bytes, output) = stage(arena)?;
        arena.charge(next.as_str(), bytes)?;

        debug!(
            from = %self.state,
            to = %next,
            elapsed_ms = started.elapsed().as_millis() as u64,
            bytes,
            scratch_in_use = arena.in_use(),
            "Pipeline stage complete"
        );

        self.state = next;
        self.history.push(next);
        Ok(output)
    }
}
