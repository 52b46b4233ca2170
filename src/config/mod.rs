//! Configuration module for the mockup renderer

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::engine::{
    DisplacementScale, LightingMode, MapParams, PipelineOptions, DEFAULT_ADJUSTMENT_REFERENCE,
    DEFAULT_BLUR_SIGMA, DEFAULT_BRIGHTNESS_DELTA, DEFAULT_DISPLACEMENT_SCALE, DEFAULT_OUTPUT_WIDTH,
};

/// Main application settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub pipeline: PipelineSettings,
    pub workers: WorkerSettings,
    pub cache: CacheSettings,
    pub sources: SourceSettings,
    pub logging: LoggingSettings,
}

/// Map derivation and compositing tunables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub brightness_delta: f32,
    pub blur_sigma: f32,
    pub adjustment_reference: u8,
    pub displacement_scale_x: f32,
    pub displacement_scale_y: f32,
    /// `hardlight` or `overlay`
    pub lighting_mode: String,
    pub output_width: u32,
    pub scratch_budget_mb: usize,
    /// Per-request deadline; 0 disables it
    pub deadline_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            brightness_delta: DEFAULT_BRIGHTNESS_DELTA,
            blur_sigma: DEFAULT_BLUR_SIGMA,
            adjustment_reference: DEFAULT_ADJUSTMENT_REFERENCE,
            displacement_scale_x: DEFAULT_DISPLACEMENT_SCALE,
            displacement_scale_y: DEFAULT_DISPLACEMENT_SCALE,
            lighting_mode: "hardlight".to_string(),
            output_width: DEFAULT_OUTPUT_WIDTH,
            scratch_budget_mb: 1024,
            deadline_ms: 0,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Defaults to one thread per CPU
    pub threads: Option<usize>,
}

/// Map cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            enabled: true,
            capacity: 16,
        }
    }
}

/// Source loading configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        SourceSettings {
            timeout_secs: 30,
            user_agent: concat!("r-mockup-press/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// JSON lines when true, compact text otherwise
    pub json: bool,
    /// Default `EnvFilter` directives; `RUST_LOG` wins when set
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            json: true,
            filter: "r_mockup_press=info,mockup_press=info".to_string(),
        }
    }
}

impl Settings {
    /// Load configuration from files and environment variables
    ///
    /// Configuration priority (highest to lowest):
    /// 1. Environment variables (MOCKUP_PIPELINE__OUTPUT_WIDTH, etc.)
    /// 2. <dir>/local.toml (gitignored)
    /// 3. <dir>/default.toml
    ///
    /// `<dir>` is `config_dir`, else `CONFIG_PATH`, else `config`.
    pub fn load(config_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let config_dir = match config_dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::var("CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config")),
        };

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("MOCKUP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Pipeline options described by these settings
    pub fn pipeline_options(&self) -> Result<PipelineOptions, ConfigError> {
        let p = &self.pipeline;
        let lighting_mode: LightingMode = p
            .lighting_mode
            .parse()
            .map_err(|e: String| ConfigError::Message(e))?;

        let map_params = MapParams {
            brightness_delta: p.brightness_delta,
            blur_sigma: p.blur_sigma,
            adjustment_reference: p.adjustment_reference,
        };
        map_params
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        Ok(PipelineOptions {
            map_params,
            displacement_scale: DisplacementScale::new(p.displacement_scale_x, p.displacement_scale_y),
            lighting_mode,
            output_width: p.output_width,
            scratch_budget: p.scratch_budget_mb.saturating_mul(1024 * 1024),
        })
    }

    pub fn deadline(&self) -> Option<Duration> {
        match self.pipeline.deadline_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.sources.timeout_secs.max(1))
    }
}
