//! Optional cache of derived map sets
//!
//! Keyed by the SHA-256 of the template pixels, mask pixels and map
//! parameters. Lookups hand out an owned copy, so every request still works on
//! its own map set.

use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::error::EngineResult;
use super::maps::{MapBuilder, MapSet};
use super::raster::{AlphaMask, RasterBuffer};

/// Bounded map-set cache shared across requests
pub struct MapCache {
    entries: DashMap<String, Arc<MapSet>>,
    capacity: usize,
}

impl MapCache {
    pub fn new(capacity: usize) -> Self {
        MapCache {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Hex SHA-256 over everything the map builder reads
    pub fn key(template: &RasterBuffer, mask: &AlphaMask, builder: &MapBuilder) -> String {
        let mut hasher = Sha256::new();
        let (tw, th) = template.dimensions();
        let (mw, mh) = mask.dimensions();
        for v in [tw, th, mw, mh] {
            hasher.update(v.to_le_bytes());
        }
        hasher.update(template.pixels().as_raw());
        hasher.update(mask.as_gray().as_raw());
        hasher.update(builder.params().to_bytes());
        hex::encode(hasher.finalize())
    }

    /// Return a copy of the cached maps, deriving and storing them on a miss
    pub fn get_or_build(
        &self,
        builder: &MapBuilder,
        template: &RasterBuffer,
        mask: &AlphaMask,
    ) -> EngineResult<MapSet> {
        let key = Self::key(template, mask, builder);

        if let Some(entry) = self.entries.get(&key) {
            debug!(key = %&key[..12], "Map cache hit");
            return Ok(entry.value().as_ref().clone());
        }

        let maps = builder.build(template, mask)?;

        if self.entries.len() >= self.capacity {
            let evict = self.entries.iter().next().map(|e| e.key().clone());
            if let Some(evict) = evict {
                self.entries.remove(&evict);
            }
        }
        self.entries.insert(key.clone(), Arc::new(maps.clone()));
        debug!(key = %&key[..12], entries = self.entries.len(), "Map cache miss, stored");

        Ok(maps)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::maps::MapParams;
    use image::Rgba;

    fn template(shade: u8) -> RasterBuffer {
        RasterBuffer::try_filled(16, 16, Rgba([shade, shade, shade, 255])).unwrap()
    }

    #[test]
    fn test_hit_returns_same_maps() {
        let cache = MapCache::new(4);
        let builder = MapBuilder::default();
        let mask = AlphaMask::opaque(16, 16);

        let first = cache.get_or_build(&builder, &template(200), &mask).unwrap();
        let second = cache.get_or_build(&builder, &template(200), &mask).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_key_depends_on_params_and_pixels() {
        let mask = AlphaMask::opaque(16, 16);
        let default = MapBuilder::default();
        let stronger = MapBuilder::new(MapParams {
            brightness_delta: 0.5,
            ..MapParams::default()
        });

        let t = template(120);
        assert_ne!(MapCache::key(&t, &mask, &default), MapCache::key(&t, &mask, &stronger));
        assert_ne!(
            MapCache::key(&t, &mask, &default),
            MapCache::key(&template(121), &mask, &default)
        );
    }

    #[test]
    fn test_capacity_is_bounded() {
        let cache = MapCache::new(2);
        let builder = MapBuilder::default();
        let mask = AlphaMask::opaque(16, 16);
        for shade in [10, 20, 30, 40] {
            cache.get_or_build(&builder, &template(shade), &mask).unwrap();
        }
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
