//! Provider trait and error types.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::key::TileKey;

/// Errors from URL building and tile downloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Provider has no URL for this key.
    #[error("no URL for tile {0}")]
    NoUrl(TileKey),

    /// Request could not be sent or the body could not be read.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Server answered with an empty body.
    #[error("empty response from {0}")]
    EmptyResponse(String),

    #[error("zoom level {0} not supported by provider")]
    UnsupportedZoom(u8),

    #[error("invalid URL template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },
}

/// Maps tile keys to download URLs.
///
/// Implementations must be cheap to call: the worker asks for a URL right
/// before every download.
pub trait TileUrlProvider: Send + Sync {
    /// Returns the URL for `key`, or `None` if the provider cannot serve it.
    fn url(&self, key: TileKey) -> Option<String>;

    /// Stable provider name. Its hash is stored in every storage file, so
    /// changing it invalidates cached tiles.
    fn name(&self) -> &str;

    /// Lowest zoom level served.
    fn min_zoom(&self) -> u8;

    /// Highest zoom level served.
    fn max_zoom(&self) -> u8;

    /// Returns true if `zoom` is within the served range.
    fn supports_zoom(&self, zoom: u8) -> bool {
        zoom >= self.min_zoom() && zoom <= self.max_zoom()
    }
}

/// Hash identifying a provider in storage file headers.
///
/// First four bytes of the SHA-256 of the provider name, little-endian.
pub fn provider_hash(name: &str) -> u32 {
    let digest = Sha256::digest(name.as_bytes());
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}
