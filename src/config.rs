//! Run configuration loaded from TOML.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::merge::JoinPredicate;
use crate::source::RetryPolicy;

/// Which pipeline variant to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Tile the entities' bounds, spatially join, then average per entity
    #[default]
    Tiles,
    /// Query each entity's snapped centroid
    Centroid,
    /// Fill a coordinate sheet by exact `(lon, lat)` match
    Exact,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub dataset: DatasetConfig,
    pub input: InputConfig,
    pub chunking: ChunkingConfig,
    pub features: FeatureConfig,
    pub join: JoinConfig,
    pub output: OutputConfig,
    pub state: StateConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatasetConfig {
    pub endpoint: String,
    /// `owner.dataset` that holds `table`
    pub reference: String,
    pub table: String,
    /// Environment variable holding the bearer token
    pub token_env: String,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
    /// Resolve exact coordinates from these local dumps instead of the service
    pub local_dumps: Vec<PathBuf>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            endpoint: crate::source::DEFAULT_ENDPOINT.to_string(),
            reference: "sdss.mosaiks".to_string(),
            table: "mosaiks_2019_planet".to_string(),
            token_env: "REDIVIS_API_TOKEN".to_string(),
            timeout_secs: 600,
            poll_interval_ms: 1000,
            retry_attempts: 2,
            retry_delay_secs: 2,
            local_dumps: Vec::new(),
        }
    }
}

impl DatasetConfig {
    /// Dataset reference sent with each query, `None` when left blank
    pub fn dataset_reference(&self) -> Option<String> {
        Some(self.reference.trim().to_string()).filter(|r| !r.is_empty())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }

    /// Bearer token from the configured environment variable, if set
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env).ok().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InputConfig {
    /// Entity sheet (`.csv` with a polygon literal column) or `.shp`
    pub entities: Option<PathBuf>,
    pub key_column: String,
    pub polygon_column: String,
    /// Coordinate sheet for exact mode
    pub coords: Option<PathBuf>,
    pub lon_column: String,
    pub lat_column: String,
    /// Row identifier in the coordinate sheet; `(lon, lat)` when unset
    pub coord_key_column: Option<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            entities: None,
            key_column: "shrid2".to_string(),
            polygon_column: "polygon".to_string(),
            coords: None,
            lon_column: "Lon".to_string(),
            lat_column: "Lat".to_string(),
            coord_key_column: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Tile edge in degrees
    pub tile_size: f64,
    /// Padding added around the total bounds in dump mode
    pub padding: f64,
    /// Keep rows lying exactly on tile edges
    pub inclusive_edges: bool,
    pub centroid_batch_size: usize,
    pub exact_batch_size: usize,
    /// Pause after this many chunks (0 disables)
    pub throttle_every: usize,
    pub throttle_secs: u64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            tile_size: 0.3,
            padding: 0.001,
            inclusive_edges: true,
            centroid_batch_size: 1000,
            exact_batch_size: 5000,
            throttle_every: 5,
            throttle_secs: 2,
        }
    }
}

impl ChunkingConfig {
    pub fn throttle_pause(&self) -> Duration {
        Duration::from_secs(self.throttle_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeatureConfig {
    pub marker: String,
    pub width: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            marker: "X_".to_string(),
            width: 4000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct JoinConfig {
    pub predicate: JoinPredicate,
    /// Drop rows repeated across tile boundaries before joining
    pub dedup: bool,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            predicate: JoinPredicate::BoundingBox,
            dedup: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub prefix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            prefix: String::new(),
        }
    }
}

impl OutputConfig {
    /// `<dir>/<prefix><name>`
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", self.prefix, name))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StateConfig {
    pub dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".mosaiks-state"),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }
}
