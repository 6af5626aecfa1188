//! Shared helpers for CLI commands.

use std::path::{Path, PathBuf};

use clap::Args;
use tilecache::cache::Cache;
use tilecache::config::CacheConfig;
use tilecache::coord::{to_tile_key, BoundingBox};
use tilecache::provider::{provider_hash, ProviderSettings};
use tilecache::storage::Storage;
use tilecache::TileKey;

use crate::error::CliError;

/// Cache and provider settings resolved from the config file and flags.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: CacheConfig,
    pub provider: ProviderSettings,
}

impl Settings {
    /// Loads `[cache]` and `[provider]` from `config_path`.
    ///
    /// `cache_dir` overrides the configured directory. Without either, the
    /// platform cache directory is used.
    pub fn load(config_path: &Path, cache_dir: Option<PathBuf>) -> Result<Self, CliError> {
        let mut cache = CacheConfig::from_ini_file(config_path)?;
        let provider = ProviderSettings::from_ini_file(config_path)?;

        if let Some(dir) = cache_dir {
            cache.directory = dir;
        } else if cache.directory == CacheConfig::default().directory {
            cache.directory = default_cache_dir();
        }
        Ok(Self { cache, provider })
    }

    /// Opens storage only, without starting a worker.
    pub fn open_storage(&self) -> Result<Storage, CliError> {
        Ok(Storage::open(
            &self.cache,
            provider_hash(&self.provider.name),
        )?)
    }

    /// Opens the full cache with the configured provider and fetcher.
    pub fn open_cache(&self) -> Result<Cache, CliError> {
        let provider = self.provider.provider()?;
        let fetcher = self.provider.fetcher()?;
        Ok(Cache::open(self.cache.clone(), provider, fetcher)?)
    }
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("tilecache").join("config.ini"))
        .unwrap_or_else(|| PathBuf::from("tilecache.ini"))
}

/// Default cache directory.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("tilecache"))
        .unwrap_or_else(|| PathBuf::from("tilecache"))
}

/// Default log directory.
pub fn default_log_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|d| d.join("tilecache"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// A tile given either by tile indices or by a geographic position.
#[derive(Debug, Clone, Args)]
pub struct TileArgs {
    /// Zoom level
    #[arg(long)]
    pub zoom: u8,

    /// Tile column
    #[arg(long)]
    pub x: Option<u32>,

    /// Tile row
    #[arg(long)]
    pub y: Option<u32>,

    /// Latitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lat: Option<f64>,

    /// Longitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lon: Option<f64>,
}

impl TileArgs {
    pub fn key(&self) -> Result<TileKey, CliError> {
        match (self.x, self.y, self.lat, self.lon) {
            (Some(x), Some(y), None, None) => TileKey::try_new(x, y, self.zoom)
                .map_err(|e| CliError::Usage(format!("Invalid tile: {}", e))),
            (None, None, Some(lat), Some(lon)) => Ok(to_tile_key(lat, lon, self.zoom)?),
            _ => Err(CliError::Usage(
                "Give either --x and --y, or --lat and --lon".to_string(),
            )),
        }
    }
}

/// A geographic bounding box.
#[derive(Debug, Clone, Args)]
pub struct BboxArgs {
    /// Southern edge in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub min_lat: f64,

    /// Western edge in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub min_lon: f64,

    /// Northern edge in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub max_lat: f64,

    /// Eastern edge in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub max_lon: f64,
}

impl BboxArgs {
    pub fn bbox(&self) -> Result<BoundingBox, CliError> {
        Ok(BoundingBox::new(
            self.min_lat,
            self.min_lon,
            self.max_lat,
            self.max_lon,
        )?)
    }
}
