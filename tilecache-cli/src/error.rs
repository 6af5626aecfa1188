//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::path::PathBuf;
use std::process;

use tilecache::cache::CacheError;
use tilecache::config::ConfigError;
use tilecache::coord::CoordError;
use tilecache::provider::ProviderError;
use tilecache::storage::StorageError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(std::io::Error),
    /// Configuration could not be loaded
    Config(ConfigError),
    /// Command-line arguments are inconsistent
    Usage(String),
    /// Invalid coordinates or bounding box
    Coord(CoordError),
    /// Storage operation failed
    Storage(StorageError),
    /// Provider could not be built
    Provider(ProviderError),
    /// Cache could not be opened or a region could not be queued
    Cache(CacheError),
    /// Tile could not be fetched
    TileFailed(String),
    /// Region download finished with failed tiles
    RegionIncomplete { name: String, failed: usize },
    /// Failed to write output file
    FileWrite { path: PathBuf, error: std::io::Error },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Config(ConfigError::Missing { .. }) | CliError::Config(ConfigError::Read { .. }) => {
                eprintln!();
                eprintln!("A config file with a [provider] section is required, e.g.:");
                eprintln!();
                eprintln!("  [provider]");
                eprintln!("  name = osm");
                eprintln!("  url_template = https://tile.openstreetmap.org/{{z}}/{{x}}/{{y}}.png");
                eprintln!();
                eprintln!("Pass it with --config <path>.");
            }
            CliError::Storage(StorageError::BadSignature { .. }) => {
                eprintln!();
                eprintln!("The file is not a tile storage file. Move it aside or pick another");
                eprintln!("cache directory with --cache-dir.");
            }
            _ => {}
        }

        process::exit(match self {
            CliError::Usage(_) => 2,
            _ => 1,
        })
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Usage(msg) => write!(f, "{}", msg),
            CliError::Coord(e) => write!(f, "Invalid coordinates: {}", e),
            CliError::Storage(e) => write!(f, "Storage error: {}", e),
            CliError::Provider(e) => write!(f, "Provider error: {}", e),
            CliError::Cache(e) => write!(f, "Cache error: {}", e),
            CliError::TileFailed(key) => write!(f, "Failed to fetch tile {}", key),
            CliError::RegionIncomplete { name, failed } => {
                write!(f, "Region '{}' is incomplete: {} tiles failed", name, failed)
            }
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write file '{}': {}", path.display(), error)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::LoggingInit(e) => Some(e),
            CliError::Config(e) => Some(e),
            CliError::Coord(e) => Some(e),
            CliError::Storage(e) => Some(e),
            CliError::Provider(e) => Some(e),
            CliError::Cache(e) => Some(e),
            CliError::FileWrite { error, .. } => Some(error),
            CliError::Usage(_)
            | CliError::TileFailed(_)
            | CliError::RegionIncomplete { .. } => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<CoordError> for CliError {
    fn from(e: CoordError) -> Self {
        CliError::Coord(e)
    }
}

impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        CliError::Storage(e)
    }
}

impl From<ProviderError> for CliError {
    fn from(e: ProviderError) -> Self {
        CliError::Provider(e)
    }
}

impl From<CacheError> for CliError {
    fn from(e: CacheError) -> Self {
        CliError::Cache(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = CliError::TileFailed("3/1/2".to_string());
        assert_eq!(err.to_string(), "Failed to fetch tile 3/1/2");

        let err: CliError = StorageError::RegionNotFound("alps".to_string()).into();
        assert_eq!(err.to_string(), "Storage error: region 'alps' not found");
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error;

        let err: CliError = StorageError::RegionExists("alps".to_string()).into();
        assert!(err.source().is_some());
        assert!(CliError::Usage("bad".to_string()).source().is_none());
    }
}
