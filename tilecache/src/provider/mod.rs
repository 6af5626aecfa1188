//! Tile URL providers and fetchers.
//!
//! A cache needs two collaborators to fill itself:
//!
//! - a [`TileUrlProvider`] mapping a [`TileKey`](crate::key::TileKey) to a
//!   URL, and
//! - a [`Fetcher`] downloading that URL.
//!
//! [`UrlTemplateProvider`] and [`ReqwestFetcher`] are ready-made
//! implementations; [`ProviderSettings`] builds both from configuration.
//!
//! ```ignore
//! use tilecache::provider::{ReqwestFetcher, UrlTemplateProvider};
//!
//! let provider = UrlTemplateProvider::new("osm", "https://tile.example.org/{z}/{x}/{y}.png")?;
//! let fetcher = ReqwestFetcher::new()?;
//! ```

mod http;
mod settings;
mod template;
mod types;

pub use http::{Fetcher, ReqwestFetcher, DEFAULT_TIMEOUT_SECS};
pub use settings::{ProviderSettings, PROVIDER_SECTION};
pub use template::UrlTemplateProvider;
pub use types::{provider_hash, ProviderError, TileUrlProvider};

#[cfg(test)]
pub use http::tests::MockFetcher;
