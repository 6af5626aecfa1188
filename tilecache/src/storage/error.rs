//! Storage error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by storage files, the region index and [`super::Storage`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// Short read or write, or any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File exists but is not a storage file. Not recoverable.
    #[error("{path}: bad signature {found:#010x}")]
    BadSignature { path: PathBuf, found: u32 },

    /// Payload can never fit under the configured size cap.
    #[error("entry of {size} bytes cannot fit in a file capped at {max} bytes")]
    EntryTooLarge { size: usize, max: u64 },

    /// Configured maximum file size is not representable in the header.
    #[error("max file size {0} exceeds the format limit of 2147483647 bytes")]
    MaxSizeTooLarge(u64),

    /// Region index could not be parsed or written.
    #[error("region index error: {0}")]
    RegionIndex(#[from] serde_json::Error),

    /// A write failed partway and left the file torn. Cleared by
    /// re-initializing or flushing the file.
    #[error("{0}: interrupted write left the file unusable")]
    Poisoned(PathBuf),

    #[error("region '{0}' already exists")]
    RegionExists(String),

    #[error("region '{0}' not found")]
    RegionNotFound(String),

    #[error("invalid region name '{0}'")]
    InvalidRegionName(String),
}
