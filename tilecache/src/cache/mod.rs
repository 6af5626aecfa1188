//! Tile cache façade.
//!
//! [`Cache`] composes a [`TileUrlProvider`], a [`Fetcher`], the disk
//! [`Storage`] and one [`AsyncWorker`]:
//!
//! ```text
//!                 query(key)                 ┌──────────────────────────┐
//!   caller ─────────────────► AsyncWorker ──►│ QueryTask                │
//!     │                        (FIFO)        │  stored?  ── load        │
//!     │ is_exist(key)                        │  else     ── download    │
//!     ▼                                      │             + save_main  │
//!   Storage (existence set)                  └────────────┬─────────────┘
//!                                                         ▼
//!                                         observers ◄── TileNotification
//! ```
//!
//! `query` never touches the disk on the caller's thread. Results arrive
//! through subscribed observers on the worker thread. Queries are not
//! deduplicated: two queries for one key produce two notifications.
//!
//! # Example
//!
//! ```ignore
//! use tilecache::cache::Cache;
//! use tilecache::config::CacheConfig;
//! use tilecache::provider::{ReqwestFetcher, UrlTemplateProvider};
//!
//! let provider = UrlTemplateProvider::new("osm", "https://tile.example.org/{z}/{x}/{y}.png")?;
//! let cache = Cache::open(CacheConfig::new("/tmp/tiles"), provider, ReqwestFetcher::new()?)?;
//! cache.subscribe(|n: TileNotification| println!("{} -> {}", n.key, n.success));
//! cache.query(TileKey::new(19295, 24640, 16));
//! ```

mod error;
mod observer;
mod tasks;

pub use error::CacheError;
pub use observer::{ObserverId, ObserverRegistry, TileNotification, TileObserver, TileSource};
pub use tasks::RegionProgress;

use std::ops::RangeInclusive;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::coord::{count_tiles_in_bbox, tiles_in_bbox, BoundingBox, MAX_ZOOM};
use crate::key::TileKey;
use crate::provider::{provider_hash, Fetcher, TileUrlProvider};
use crate::storage::Storage;
use crate::worker::AsyncWorker;

use tasks::{CacheContext, QueryTask, RegionTask};

/// Upper bound on the tiles of one region download.
pub const MAX_REGION_TILES: u64 = 1_000_000;

/// Disk-backed tile cache with a background worker.
pub struct Cache {
    context: Arc<CacheContext>,
    worker: AsyncWorker,
    config: CacheConfig,
}

impl Cache {
    /// Opens storage under `config.directory` and starts the worker.
    ///
    /// Storage files written for a different provider name are regenerated.
    ///
    /// # Arguments
    ///
    /// * `config` - Cache settings
    /// * `provider` - Maps keys to URLs; its name keys the storage files
    /// * `fetcher` - Downloads URLs
    pub fn open<P, F>(config: CacheConfig, provider: P, fetcher: F) -> Result<Self, CacheError>
    where
        P: TileUrlProvider + 'static,
        F: Fetcher + 'static,
    {
        config.validate()?;
        let hash = provider_hash(provider.name());
        let storage = Arc::new(Storage::open(&config, hash)?);

        let worker = AsyncWorker::new(config.worker_thread_name.clone());
        worker.run_service().map_err(CacheError::Worker)?;

        info!(
            provider = provider.name(),
            directory = %config.directory.display(),
            "Cache opened"
        );

        Ok(Self {
            context: Arc::new(CacheContext {
                storage,
                provider: Arc::new(provider),
                fetcher: Arc::new(fetcher),
                observers: Arc::new(ObserverRegistry::new()),
            }),
            worker,
            config,
        })
    }

    /// Requests `key`. Returns immediately; the result is delivered to
    /// observers.
    pub fn query(&self, key: TileKey) {
        self.worker
            .add_task(Box::new(QueryTask::new(key, Arc::clone(&self.context))));
    }

    /// Returns true if any storage file holds `key`. Never blocks on I/O.
    pub fn is_exist(&self, key: &TileKey) -> bool {
        self.context.storage.is_exist(key)
    }

    /// Registers an observer for all task completions.
    pub fn subscribe(&self, observer: impl TileObserver + 'static) -> ObserverId {
        self.context.observers.subscribe(Arc::new(observer))
    }

    /// Registers an observer that forwards completions into a channel.
    ///
    /// The channel is unbounded so the worker never waits on the receiver.
    pub fn subscribe_channel(&self) -> (ObserverId, mpsc::UnboundedReceiver<TileNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |notification: TileNotification| {
            // Receiver gone means nobody is listening any more.
            let _ = tx.send(notification);
        });
        (id, rx)
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.context.observers.unsubscribe(id)
    }

    /// Registers region `name` and queues a download of every tile covering
    /// `bbox` at each zoom level in `zooms` that the provider serves.
    ///
    /// The region is marked stored once every tile succeeded, or invalid if
    /// any failed. Each tile is also reported to observers with
    /// [`TileSource::Region`].
    ///
    /// Returns the number of queued tiles.
    pub fn download_region(
        &self,
        name: &str,
        bbox: BoundingBox,
        zooms: RangeInclusive<u8>,
    ) -> Result<usize, CacheError> {
        let provider = &self.context.provider;
        let min = (*zooms.start()).max(provider.min_zoom());
        let max = (*zooms.end()).min(provider.max_zoom()).min(MAX_ZOOM);
        if min > max {
            return Err(CacheError::ZoomOutOfRange {
                min: *zooms.start(),
                max: *zooms.end(),
                provider_min: provider.min_zoom(),
                provider_max: provider.max_zoom(),
            });
        }

        let mut tiles = 0u64;
        for zoom in min..=max {
            tiles += count_tiles_in_bbox(&bbox, zoom)?;
        }
        if tiles > MAX_REGION_TILES {
            return Err(CacheError::RegionTooLarge {
                tiles,
                limit: MAX_REGION_TILES,
            });
        }

        let mut keys = Vec::with_capacity(tiles as usize);
        for zoom in min..=max {
            keys.extend(tiles_in_bbox(&bbox, zoom)?);
        }

        self.context.storage.region_add(name, bbox)?;
        let progress = Arc::new(RegionProgress::new(name, keys.len()));
        for &key in &keys {
            self.worker.add_task(Box::new(RegionTask::new(
                key,
                Arc::clone(&self.context),
                Arc::clone(&progress),
            )));
        }

        info!(region = %name, tiles = keys.len(), zooms = ?(min..=max), "Region download queued");
        Ok(keys.len())
    }

    /// Shared storage, for region management and statistics.
    pub fn storage(&self) -> &Arc<Storage> {
        &self.context.storage
    }

    pub fn provider(&self) -> &dyn TileUrlProvider {
        self.context.provider.as_ref()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Tasks waiting on the worker.
    pub fn pending(&self) -> usize {
        self.worker.pending()
    }

    /// Stops the worker. Queued tasks are dropped without notification.
    pub fn shutdown(&self) {
        debug!(pending = self.worker.pending(), "Cache shutting down");
        self.worker.stop_service();
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("provider", &self.context.provider.name())
            .field("storage", &self.context.storage)
            .field("worker", &self.worker)
            .finish()
    }
}
