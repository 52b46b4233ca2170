//! mockup-press
//!
//! Renders one photorealistic mockup from a template photo, a printable-area
//! mask and a piece of artwork, optionally writing the derived maps as well.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use r_mockup_press::config::{LoggingSettings, Settings};
use r_mockup_press::domain::{Quad, RequestSpec};
use r_mockup_press::engine::{
    encode, DisplacementScale, EncodedMockup, LightingMode, MapCache, MapSet, MockupError, OutputFormat,
    PipelineOptions, RasterBuffer, WorkerPool,
};
use r_mockup_press::sources::{load_request, DefaultSourceLoader, FileSink, OutputSink};

#[derive(Parser, Debug)]
#[command(name = "mockup-press", version, allow_negative_numbers = true)]
struct Cli {
    /// Template photo (path or http(s) URL).
    template: String,

    /// Printable-area mask (path or URL).
    mask: String,

    /// Artwork to print (path or URL).
    artwork: String,

    /// Artwork width in template pixels.
    logo_width: u32,

    /// Artwork height in template pixels.
    logo_height: u32,

    /// Left edge of the artwork.
    position_x: i32,

    /// Top edge of the artwork.
    position_y: i32,

    /// Clockwise rotation in degrees.
    rotation: i32,

    /// [displacementMapOut] [lightingMapOut] [adjustmentMapOut] <output>
    #[arg(required = true, num_args = 1..=4, value_name = "OUTPUTS")]
    outputs: Vec<PathBuf>,

    /// Final image width (aspect ratio is kept).
    #[arg(long)]
    output_width: Option<u32>,

    /// Perspective corners `x1,y1,x2,y2,x3,y3,x4,y4` (TL, TR, BR, BL).
    #[arg(long)]
    perspective: Option<Quad>,

    /// `hardlight` or `overlay`.
    #[arg(long)]
    lighting_mode: Option<LightingMode>,

    /// Darkening applied before the lighting/displacement maps, 0..=1.
    #[arg(long)]
    brightness_delta: Option<f32>,

    /// Displacement strength `SX` or `SXxSY` in pixels.
    #[arg(long)]
    displacement_scale: Option<DisplacementScale>,

    /// Abort if rendering takes longer than this.
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Override worker threads.
    #[arg(long)]
    threads: Option<usize>,

    /// Configuration directory (default: $CONFIG_PATH or ./config).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Precomputed displacement map; requires the lighting and adjustment maps too.
    #[arg(long, requires_all = ["lighting_map", "adjustment_map"])]
    displacement_map: Option<String>,

    /// Precomputed lighting map.
    #[arg(long, requires_all = ["displacement_map", "adjustment_map"])]
    lighting_map: Option<String>,

    /// Precomputed adjustment map.
    #[arg(long, requires_all = ["displacement_map", "lighting_map"])]
    adjustment_map: Option<String>,
}

impl Cli {
    fn request_spec(&self) -> RequestSpec {
        RequestSpec {
            template: self.template.clone(),
            mask: self.mask.clone(),
            artwork: self.artwork.clone(),
            logo_width: self.logo_width,
            logo_height: self.logo_height,
            position_x: self.position_x,
            position_y: self.position_y,
            rotation: self.rotation,
            output_width: self.output_width,
            perspective: self.perspective,
            displacement_map: self.displacement_map.clone(),
            lighting_map: self.lighting_map.clone(),
            adjustment_map: self.adjustment_map.clone(),
        }
    }

    /// Final output path plus the requested map outputs in
    /// displacement, lighting, adjustment order
    fn output_paths(&self) -> (&Path, &[PathBuf]) {
        match self.outputs.split_last() {
            Some((output, maps)) => (output.as_path(), maps),
            None => (Path::new("mockup.png"), &[]),
        }
    }

    fn pipeline_options(&self, settings: &Settings) -> anyhow::Result<PipelineOptions> {
        let mut options = settings.pipeline_options().context("invalid pipeline configuration")?;
        if let Some(mode) = self.lighting_mode {
            options.lighting_mode = mode;
        }
        if let Some(delta) = self.brightness_delta {
            options.map_params.brightness_delta = delta;
            options.map_params.validate()?;
        }
        if let Some(scale) = self.displacement_scale {
            options.displacement_scale = scale;
        }
        Ok(options)
    }
}

fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&settings.logging);

    match run(&cli, &settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<MockupError>() {
            Some(mockup_err) => {
                let kind = mockup_err.kind();
                eprintln!("error[{}]: {}", kind, mockup_err);
                if settings.logging.json {
                    if let Ok(line) = serde_json::to_string(&mockup_err.report()) {
                        eprintln!("{}", line);
                    }
                }
                ExitCode::from(kind.exit_code())
            }
            None => {
                eprintln!("error: {:#}", err);
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(cli: &Cli, settings: &Settings) -> anyhow::Result<()> {
    let options = cli.pipeline_options(settings)?;
    let deadline = match cli.deadline_ms {
        Some(0) => None,
        Some(ms) => Some(Duration::from_millis(ms)),
        None => settings.deadline(),
    };
    let (output_path, map_paths) = cli.output_paths();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        template = %cli.template,
        artwork = %cli.artwork,
        lighting_mode = %options.lighting_mode,
        displacement_scale = %options.displacement_scale,
        "Starting mockup-press"
    );

    let loader = DefaultSourceLoader::new(settings.source_timeout(), &settings.sources.user_agent)?;
    let mut request = load_request(&loader, &cli.request_spec()).await?;
    if !map_paths.is_empty() {
        request = request.retaining_maps();
    }

    let mut pool = WorkerPool::new(options, cli.threads.or(settings.workers.threads))?.with_default_timeout(deadline);
    if settings.cache.enabled {
        pool = pool.with_cache(Arc::new(MapCache::new(settings.cache.capacity)));
    }

    let output = pool.render(request, None).await?;

    // Encode everything before touching the filesystem
    let format = OutputFormat::from_extension(output_path.extension().and_then(|e| e.to_str()).unwrap_or("png"));
    let encoded = encode(&output.image, format)?;
    let encoded_maps = match &output.maps {
        Some(maps) => encode_maps(maps, map_paths)?,
        None => Vec::new(),
    };

    FileSink::new(output_path)
        .write(&encoded)
        .await
        .with_context(|| format!("write mockup '{}'", output_path.display()))?;
    for (path, map) in &encoded_maps {
        FileSink::new(path)
            .write(map)
            .await
            .with_context(|| format!("write map '{}'", path.display()))?;
    }

    info!(
        request_id = %output.request_id,
        output = %output_path.display(),
        width = encoded.width,
        height = encoded.height,
        elapsed_ms = output.elapsed.as_millis() as u64,
        peak_scratch_bytes = output.peak_scratch_bytes,
        "Mockup written"
    );
    Ok(())
}

/// PNG-encode the requested maps in displacement, lighting, adjustment order
fn encode_maps<'p>(maps: &MapSet, paths: &'p [PathBuf]) -> anyhow::Result<Vec<(&'p Path, EncodedMockup)>> {
    let ordered: [&RasterBuffer; 3] = [&maps.displacement, &maps.lighting, &maps.adjustment];
    paths
        .iter()
        .zip(ordered)
        .map(|(path, map)| Ok((path.as_path(), encode(map, OutputFormat::Png)?)))
        .collect()
}
