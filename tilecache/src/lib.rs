//! TileCache - disk-backed quadtree tile cache
//!
//! Stores raster tiles addressed by `(x, y, zoom)` in block-linked storage
//! files with usage-counter eviction, and fills itself from a remote tile
//! provider on a background worker thread.
//!
//! # Modules
//!
//! - [`key`]: packed 64-bit tile keys
//! - [`coord`]: geographic coordinates to tile keys
//! - [`storage`]: on-disk format, storage files and named regions
//! - [`worker`]: single-threaded FIFO task service
//! - [`provider`]: tile URL providers and HTTP fetchers
//! - [`cache`]: the [`Cache`](cache::Cache) façade tying everything together
//! - [`config`]: cache settings and INI loading
//! - [`logging`]: tracing setup

pub mod cache;
pub mod config;
pub mod coord;
pub mod key;
pub mod logging;
pub mod provider;
pub mod storage;
pub mod worker;

pub use cache::{Cache, CacheError, TileNotification, TileSource};
pub use config::CacheConfig;
pub use key::TileKey;
