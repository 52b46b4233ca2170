//! Request worker pool
//!
//! Independent requests run in parallel on a dedicated rayon pool; each one is
//! processed single-threaded by its own `Pipeline`. Async callers get the
//! result back through a oneshot channel and never block the runtime.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, info};

use super::cache::MapCache;
use super::error::{EngineResult, MockupError};
use super::pipeline::{MockupOutput, MockupRequest, Pipeline, PipelineOptions};

/// Rayon-backed pool that renders mockups
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    options: Arc<PipelineOptions>,
    cache: Option<Arc<MapCache>>,
    default_timeout: Option<Duration>,
}

impl WorkerPool {
    /// Build a pool with `threads` workers, or one per CPU when `None`
    pub fn new(options: PipelineOptions, threads: Option<usize>) -> EngineResult<Self> {
        let threads = threads.filter(|n| *n > 0).unwrap_or_else(num_cpus::get);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("mockup-worker-{}", i))
            .build()
            .map_err(|e| MockupError::ResourceExhausted(format!("failed to start worker pool: {}", e)))?;

        info!(threads, "Worker pool started");

        Ok(WorkerPool {
            pool,
            options: Arc::new(options),
            cache: None,
            default_timeout: None,
        })
    }

    pub fn with_cache(mut self, cache: Arc<MapCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Deadline applied to requests that don't bring their own
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Render on the pool, blocking the calling thread until done
    pub fn render_blocking(&self, request: MockupRequest, timeout: Option<Duration>) -> EngineResult<MockupOutput> {
        let deadline = timeout.or(self.default_timeout).map(|t| Instant::now() + t);
        let options = &self.options;
        let cache = self.cache.as_deref();
        self.pool
            .install(|| Pipeline::new(options).with_cache(cache).with_deadline(deadline).run(request))
    }

    /// Render on the pool without blocking the async runtime
    pub async fn render(&self, request: MockupRequest, timeout: Option<Duration>) -> EngineResult<MockupOutput> {
        let deadline = timeout.or(self.default_timeout).map(|t| Instant::now() + t);
        let options = Arc::clone(&self.options);
        let cache = self.cache.clone();
        let request_id = request.id;
        let (tx, rx) = oneshot::channel();

        self.pool.spawn(move || {
            let result = Pipeline::new(&options)
                .with_cache(cache.as_deref())
                .with_deadline(deadline)
                .run(request);
            if tx.send(result).is_err() {
                debug!(request_id = %request_id, "Caller went away before the mockup finished");
            }
        });

        rx.await.map_err(|_| {
            MockupError::CompositionFailure(format!("worker for request {} stopped without a result", request_id))
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PlacementSpec;
    use crate::engine::raster::{AlphaMask, RasterBuffer};
    use image::Rgba;

    fn request() -> MockupRequest {
        let template = RasterBuffer::try_filled(40, 30, Rgba([200, 200, 200, 255])).unwrap();
        let artwork = RasterBuffer::try_filled(10, 10, Rgba([255, 0, 0, 255])).unwrap();
        MockupRequest::new(template, AlphaMask::opaque(40, 30), artwork, PlacementSpec::new(5, 5, 10, 10, 0.0))
            .with_output_width(20)
    }

    #[test]
    fn test_render_blocking() {
        let pool = WorkerPool::new(PipelineOptions::default(), Some(2)).unwrap();
        assert_eq!(pool.threads(), 2);
        let output = pool.render_blocking(request(), None).unwrap();
        assert_eq!(output.image.dimensions(), (20, 15));
    }

    #[tokio::test]
    async fn test_render_async_in_parallel() {
        let pool = WorkerPool::new(PipelineOptions::default(), Some(2))
            .unwrap()
            .with_cache(Arc::new(MapCache::new(4)));

        let (a, b) = futures::join!(pool.render(request(), None), pool.render(request(), None));
        assert_eq!(a.unwrap().image.dimensions(), (20, 15));
        assert_eq!(b.unwrap().image.dimensions(), (20, 15));
    }

    #[tokio::test]
    async fn test_zero_timeout_is_cancelled() {
        let pool = WorkerPool::new(PipelineOptions::default(), Some(1)).unwrap();
        let err = pool.render(request(), Some(Duration::ZERO)).await.unwrap_err();
        assert!(matches!(err, MockupError::Cancelled(_)));
    }
}
