//! Cache configuration.
//!
//! [`CacheConfig`] is a plain struct with defaults and builder-style setters.
//! It can also be loaded from the `[cache]` section of an INI file:
//!
//! ```ini
//! [cache]
//! directory = /var/cache/tiles
//! max_size = 512MB
//! tolerance = 8MB
//! block_capacity = 100
//! ```
//!
//! Keys that are absent keep their defaults.

use std::path::{Path, PathBuf};

use ini::{Ini, Properties};
use thiserror::Error;

use crate::storage::DEFAULT_BLOCK_CAPACITY;

/// Default cap for each storage file (256 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Default overshoot allowed past the cap before a flush (4 MiB).
pub const DEFAULT_EVICTION_TOLERANCE: u64 = 4 * 1024 * 1024;

pub const DEFAULT_MAIN_FILE: &str = "main.tiles";
pub const DEFAULT_REGION_INDEX_FILE: &str = "regions.json";
pub const DEFAULT_WORKER_THREAD_NAME: &str = "tilecache-worker";

/// INI section read by [`CacheConfig::from_ini`].
pub const CACHE_SECTION: &str = "cache";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] ini::ParseError),

    #[error("invalid value for [{section}] {key} = '{value}': {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("missing required setting [{section}] {key}")]
    Missing { section: String, key: String },
}

impl ConfigError {
    pub(crate) fn invalid(section: &str, key: &str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Settings for one cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Directory holding all storage files and the region index.
    pub directory: PathBuf,

    /// File name of the main storage file.
    pub main_file: String,

    /// File name of the region index.
    pub region_index_file: String,

    /// Size cap for each storage file in bytes.
    pub max_file_size: u64,

    /// Bytes a file may grow past `max_file_size` while evicting.
    pub eviction_tolerance: u64,

    /// Records per key block. Changing it regenerates existing files.
    pub block_capacity: u32,

    /// Name of the background worker thread.
    pub worker_thread_name: String,
}

impl CacheConfig {
    /// Creates a config for `directory` with default settings.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub fn with_main_file(mut self, name: impl Into<String>) -> Self {
        self.main_file = name.into();
        self
    }

    pub fn with_region_index_file(mut self, name: impl Into<String>) -> Self {
        self.region_index_file = name.into();
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_eviction_tolerance(mut self, bytes: u64) -> Self {
        self.eviction_tolerance = bytes;
        self
    }

    pub fn with_block_capacity(mut self, capacity: u32) -> Self {
        self.block_capacity = capacity;
        self
    }

    pub fn with_worker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.worker_thread_name = name.into();
        self
    }

    /// Checks that the settings can be used to open storage.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limit = i32::MAX as u64;
        if self.max_file_size.saturating_add(self.eviction_tolerance) > limit {
            return Err(ConfigError::invalid(
                CACHE_SECTION,
                "max_size",
                &self.max_file_size.to_string(),
                format!("max_size + tolerance must not exceed {} bytes", limit),
            ));
        }
        if self.block_capacity == 0 {
            return Err(ConfigError::invalid(
                CACHE_SECTION,
                "block_capacity",
                "0",
                "must be at least 1",
            ));
        }
        if self.main_file.is_empty() {
            return Err(ConfigError::invalid(
                CACHE_SECTION,
                "main_file",
                "",
                "must not be empty",
            ));
        }
        Ok(())
    }

    /// Loads the `[cache]` section of an INI file.
    pub fn from_ini_file(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    /// Loads the `[cache]` section from INI text.
    pub fn from_ini_str(content: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(content)?;
        Self::from_ini(&ini)
    }

    /// Builds a config from a parsed INI document, starting from defaults.
    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some(CACHE_SECTION)) {
            if let Some(v) = section.get("directory") {
                config.directory = expand_tilde(v);
            }
            if let Some(v) = section.get("main_file") {
                config.main_file = v.to_string();
            }
            if let Some(v) = section.get("region_index") {
                config.region_index_file = v.to_string();
            }
            if let Some(v) = size_value(section, "max_size")? {
                config.max_file_size = v;
            }
            if let Some(v) = size_value(section, "tolerance")? {
                config.eviction_tolerance = v;
            }
            if let Some(v) = section.get("block_capacity") {
                config.block_capacity = v.trim().parse().map_err(|_| {
                    ConfigError::invalid(CACHE_SECTION, "block_capacity", v, "expected an integer")
                })?;
            }
            if let Some(v) = section.get("worker_name") {
                config.worker_thread_name = v.to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("tilecache"),
            main_file: DEFAULT_MAIN_FILE.to_string(),
            region_index_file: DEFAULT_REGION_INDEX_FILE.to_string(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            eviction_tolerance: DEFAULT_EVICTION_TOLERANCE,
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            worker_thread_name: DEFAULT_WORKER_THREAD_NAME.to_string(),
        }
    }
}

fn size_value(section: &Properties, key: &str) -> Result<Option<u64>, ConfigError> {
    section
        .get(key)
        .map(|v| {
            parse_size(v).ok_or_else(|| {
                ConfigError::invalid(
                    CACHE_SECTION,
                    key,
                    v,
                    "expected a size like '256MB', '512KB' or '1GB'",
                )
            })
        })
        .transpose()
}

/// Expands a leading `~` to the user's home directory.
fn expand_tilde(value: &str) -> PathBuf {
    match (value.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(value),
    }
}

/// Parses a human-readable size.
///
/// Bare numbers are bytes. `K`/`KB`, `M`/`MB` and `G`/`GB` suffixes use
/// powers of 1024, case-insensitively, with optional whitespace before the
/// suffix.
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let upper = s.to_ascii_uppercase();
    let upper = upper.strip_suffix('B').unwrap_or(upper.as_str());

    let (digits, multiplier) = match upper.chars().last()? {
        'K' => (&upper[..upper.len() - 1], 1024u64),
        'M' => (&upper[..upper.len() - 1], 1024 * 1024),
        'G' => (&upper[..upper.len() - 1], 1024 * 1024 * 1024),
        _ => (upper, 1),
    };

    digits.trim().parse::<u64>().ok()?.checked_mul(multiplier)
}

/// Formats a byte count using the largest exact unit.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB && bytes % GB == 0 {
        format!("{}GB", bytes / GB)
    } else if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{}KB", bytes / KB)
    } else {
        format!("{}", bytes)
    }
}
