//! Cache façade errors.

use thiserror::Error;

use crate::config::ConfigError;
use crate::coord::CoordError;
use crate::provider::ProviderError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Coord(#[from] CoordError),

    #[error("failed to start worker thread: {0}")]
    Worker(#[source] std::io::Error),

    /// Requested zoom levels do not overlap the provider's range.
    #[error("zoom range {min}..={max} outside provider range {provider_min}..={provider_max}")]
    ZoomOutOfRange {
        min: u8,
        max: u8,
        provider_min: u8,
        provider_max: u8,
    },

    #[error("region would contain {tiles} tiles (limit {limit})")]
    RegionTooLarge { tiles: u64, limit: u64 },
}
