//! Domain types and models

mod placement;
mod request;

pub use placement::{normalize_degrees, PlacementSpec, Point, Quad, MAX_DIMENSION};
pub use request::RequestSpec;
