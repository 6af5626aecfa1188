//! Worker tasks issued by the cache.
//!
//! - [`QueryTask`] serves one `query`: load from storage if present,
//!   otherwise download. A fresh download is saved to the main file before
//!   observers are notified.
//! - [`RegionTask`] fetches one tile of a region download into the region's
//!   own file and reports to the shared [`RegionProgress`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::key::TileKey;
use crate::provider::{Fetcher, ProviderError, TileUrlProvider};
use crate::storage::{SaveOutcome, Storage};
use crate::worker::{Task, TaskError};

use super::observer::{ObserverRegistry, TileNotification, TileSource};

/// Collaborators shared by every task of one cache.
pub(crate) struct CacheContext {
    pub storage: Arc<Storage>,
    pub provider: Arc<dyn TileUrlProvider>,
    pub fetcher: Arc<dyn Fetcher>,
    pub observers: Arc<ObserverRegistry>,
}

impl CacheContext {
    fn download(&self, key: TileKey) -> Result<Vec<u8>, TaskError> {
        let url = self.provider.url(key).ok_or(ProviderError::NoUrl(key))?;
        debug!(key = %key, url = %url, "Downloading tile");
        Ok(self.fetcher.download(&url)?)
    }

    /// Reads `key` from whichever file holds it.
    fn load_stored(&self, key: TileKey) -> Result<Option<Vec<u8>>, TaskError> {
        match self.storage.get_key_pair(&key) {
            Some(location) => Ok(self.storage.load(&location)?),
            None => Ok(None),
        }
    }
}

enum Fetched {
    Stored(Vec<u8>),
    Downloaded(Vec<u8>),
}

/// Load-or-download for a single key.
pub(crate) struct QueryTask {
    key: TileKey,
    context: Arc<CacheContext>,
    fetched: Option<Fetched>,
    /// Phase reached by `execute`; a failure is reported against it.
    phase: TileSource,
}

impl QueryTask {
    pub fn new(key: TileKey, context: Arc<CacheContext>) -> Self {
        Self {
            key,
            context,
            fetched: None,
            phase: TileSource::Storage,
        }
    }
}

impl Task for QueryTask {
    fn name(&self) -> &str {
        "Query"
    }

    fn execute(&mut self) -> Result<(), TaskError> {
        if let Some(data) = self.context.load_stored(self.key)? {
            self.fetched = Some(Fetched::Stored(data));
            return Ok(());
        }
        self.phase = TileSource::Network;
        let data = self.context.download(self.key)?;
        self.fetched = Some(Fetched::Downloaded(data));
        Ok(())
    }

    fn notify(self: Box<Self>, success: bool) {
        let QueryTask {
            key,
            context,
            fetched,
            phase,
        } = *self;

        let notification = match (success, fetched) {
            (true, Some(Fetched::Stored(data))) => {
                TileNotification::succeeded(key, Bytes::from(data), TileSource::Storage)
            }
            (true, Some(Fetched::Downloaded(data))) => {
                match context.storage.save_main(key, &data) {
                    Ok(outcome) => debug!(key = %key, outcome = ?outcome, "Persisted download"),
                    Err(e) => warn!(key = %key, error = %e, "Failed to persist download"),
                }
                TileNotification::succeeded(key, Bytes::from(data), TileSource::Network)
            }
            _ => TileNotification::failed(key, phase),
        };
        context.observers.dispatch(notification);
    }
}

/// Completion tracking for one region download.
///
/// When the last tile reports, the region is marked stored if every tile
/// succeeded and invalid otherwise.
#[derive(Debug)]
pub struct RegionProgress {
    region: String,
    total: usize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl RegionProgress {
    pub fn new(region: impl Into<String>, total: usize) -> Self {
        Self {
            region: region.into(),
            total,
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.completed() >= self.total
    }

    /// Records one tile. Returns true if it was the last one.
    fn record(&self, success: bool, storage: &Storage) -> bool {
        if !success {
            self.failed.fetch_add(1, Ordering::AcqRel);
        }
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        if completed != self.total {
            return false;
        }

        let failed = self.failed();
        let result = if failed == 0 {
            storage.region_mark_stored(&self.region)
        } else {
            storage.region_mark_invalid(&self.region)
        };
        match result {
            Ok(()) if failed == 0 => {
                info!(region = %self.region, tiles = self.total, "Region download complete")
            }
            Ok(()) => warn!(
                region = %self.region,
                failed,
                tiles = self.total,
                "Region download incomplete"
            ),
            Err(e) => warn!(region = %self.region, error = %e, "Failed to update region status"),
        }
        true
    }
}

/// Fetches one tile of a region into the region's file.
pub(crate) struct RegionTask {
    key: TileKey,
    context: Arc<CacheContext>,
    progress: Arc<RegionProgress>,
    data: Option<Vec<u8>>,
}

impl RegionTask {
    pub fn new(key: TileKey, context: Arc<CacheContext>, progress: Arc<RegionProgress>) -> Self {
        Self {
            key,
            context,
            progress,
            data: None,
        }
    }
}

impl Task for RegionTask {
    fn name(&self) -> &str {
        "RegionTile"
    }

    fn execute(&mut self) -> Result<(), TaskError> {
        let region = self.progress.region();
        // Reuse a copy already held by another file before going to the network.
        let data = match self.context.load_stored(self.key)? {
            Some(data) => data,
            None => self.context.download(self.key)?,
        };

        match self.context.storage.save_separate(region, self.key, &data)? {
            SaveOutcome::Stored { evicted: Some(_) } | SaveOutcome::NeedToFlush => {
                return Err(TaskError::RegionFull(region.to_string()));
            }
            SaveOutcome::Stored { evicted: None } | SaveOutcome::AlreadyPresent => {}
        }
        self.data = Some(data);
        Ok(())
    }

    fn notify(self: Box<Self>, success: bool) {
        let RegionTask {
            key,
            context,
            progress,
            data,
        } = *self;

        progress.record(success, &context.storage);

        let source = TileSource::Region(progress.region().to_string());
        let notification = match (success, data) {
            (true, Some(data)) => TileNotification::succeeded(key, Bytes::from(data), source),
            _ => TileNotification::failed(key, source),
        };
        context.observers.dispatch(notification);
    }
}
