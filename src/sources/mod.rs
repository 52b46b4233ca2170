//! Input and output collaborators
//!
//! Sources are filesystem paths or http(s) URLs. Bytes are fetched
//! asynchronously and decoded on a blocking thread; any fetch or decode
//! failure is `SourceUnavailable`. Encoded mockups leave through an
//! `OutputSink`.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

use crate::domain::RequestSpec;
use crate::engine::{AlphaMask, EncodedMockup, EngineResult, MapSet, MockupError, MockupRequest, RasterBuffer};

/// Where an input image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    Path(PathBuf),
    Url(Url),
}

impl SourceRef {
    /// Strings containing `://` are URLs (`file://` becomes a path), everything else is a path
    pub fn parse(raw: &str) -> EngineResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MockupError::SourceUnavailable("empty source reference".to_string()));
        }
        if !raw.contains("://") {
            return Ok(SourceRef::Path(PathBuf::from(raw)));
        }

        let url = Url::parse(raw).map_err(|e| MockupError::SourceUnavailable(format!("invalid URL '{}': {}", raw, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(SourceRef::Url(url)),
            "file" => url
                .to_file_path()
                .map(SourceRef::Path)
                .map_err(|_| MockupError::SourceUnavailable(format!("invalid file URL '{}'", raw))),
            other => Err(MockupError::SourceUnavailable(format!(
                "unsupported URL scheme '{}' in '{}'",
                other, raw
            ))),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Path(path) => write!(f, "{}", path.display()),
            SourceRef::Url(url) => write!(f, "{}", url),
        }
    }
}

/// Fetches and decodes input images
#[async_trait]
pub trait SourceLoader: Send + Sync {
    /// Raw encoded bytes of a source
    async fn fetch(&self, source: &SourceRef) -> EngineResult<Bytes>;

    /// Fetch and decode into an RGBA buffer
    async fn load_raster(&self, source: &SourceRef) -> EngineResult<RasterBuffer> {
        let bytes = self.fetch(source).await?;
        let label = source.to_string();
        tokio::task::spawn_blocking(move || decode_raster(&bytes))
            .await
            .map_err(|e| MockupError::SourceUnavailable(format!("decode task for {} failed: {}", label, e)))?
    }
}

/// Filesystem and HTTP loader
pub struct DefaultSourceLoader {
    client: Client,
}

impl DefaultSourceLoader {
    pub fn new(timeout: Duration, user_agent: &str) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(user_agent)
            .build()
            .map_err(|e| MockupError::SourceUnavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(DefaultSourceLoader { client })
    }
}

#[async_trait]
impl SourceLoader for DefaultSourceLoader {
    async fn fetch(&self, source: &SourceRef) -> EngineResult<Bytes> {
        match source {
            SourceRef::Path(path) => {
                let data = tokio::fs::read(path)
                    .await
                    .map_err(|e| MockupError::SourceUnavailable(format!("{}: {}", path.display(), e)))?;
                debug!(path = %path.display(), bytes = data.len(), "Read source file");
                Ok(Bytes::from(data))
            }
            SourceRef::Url(url) => {
                let response = self.client.get(url.clone()).send().await?.error_for_status()?;
                let data = response.bytes().await?;
                debug!(url = %url, bytes = data.len(), "Downloaded source");
                Ok(data)
            }
        }
    }
}

/// Decode any format the `image` crate understands
pub fn decode_raster(bytes: &[u8]) -> EngineResult<RasterBuffer> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| MockupError::SourceUnavailable(format!("cannot decode image: {}", e)))?;
    RasterBuffer::from_dynamic(&image)
}

/// Load every source a request names, concurrently
pub async fn load_request<L: SourceLoader + ?Sized>(loader: &L, spec: &RequestSpec) -> EngineResult<MockupRequest> {
    let template_ref = SourceRef::parse(&spec.template)?;
    let mask_ref = SourceRef::parse(&spec.mask)?;
    let artwork_ref = SourceRef::parse(&spec.artwork)?;

    let (template, mask, artwork) = futures::try_join!(
        loader.load_raster(&template_ref),
        loader.load_raster(&mask_ref),
        loader.load_raster(&artwork_ref),
    )?;

    info!(
        template = %template_ref,
        template_width = template.width(),
        template_height = template.height(),
        artwork_width = artwork.width(),
        artwork_height = artwork.height(),
        "Loaded request sources"
    );

    let mut request = MockupRequest::new(template, AlphaMask::from_raster(&mask), artwork, spec.placement());
    if let Some(width) = spec.output_width {
        request = request.with_output_width(width);
    }
    if let Some(maps) = load_maps(loader, spec).await? {
        request = request.with_maps(maps);
    }
    Ok(request)
}

async fn load_maps<L: SourceLoader + ?Sized>(loader: &L, spec: &RequestSpec) -> EngineResult<Option<MapSet>> {
    let [displacement, lighting, adjustment] = match spec.map_sources()? {
        Some(sources) => sources,
        None => return Ok(None),
    };
    let displacement = SourceRef::parse(displacement)?;
    let lighting = SourceRef::parse(lighting)?;
    let adjustment = SourceRef::parse(adjustment)?;

    let (displacement, lighting, adjustment) = futures::try_join!(
        loader.load_raster(&displacement),
        loader.load_raster(&lighting),
        loader.load_raster(&adjustment),
    )?;
    Ok(Some(MapSet {
        lighting,
        displacement,
        adjustment,
    }))
}

/// Destination for encoded images
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn write(&self, mockup: &EncodedMockup) -> io::Result<()>;
}

/// Writes to a single file, creating parent directories
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSink { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OutputSink for FileSink {
    async fn write(&self, mockup: &EncodedMockup) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, &mockup.bytes).await?;
        info!(
            path = %self.path.display(),
            width = mockup.width,
            height = mockup.height,
            bytes = mockup.bytes.len(),
            "Wrote image"
        );
        Ok(())
    }
}
