//! Completion notifications.
//!
//! Every task the cache runs ends with one [`TileNotification`] delivered to
//! each subscribed [`TileObserver`], on the worker thread. Observers must not
//! block: the next task waits until they return.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::key::TileKey;

/// Where a notified payload came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileSource {
    /// Read from a storage file.
    Storage,
    /// Downloaded for a query and saved to the main file.
    Network,
    /// Fetched as part of a region download.
    Region(String),
}

impl fmt::Display for TileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileSource::Storage => f.write_str("storage"),
            TileSource::Network => f.write_str("network"),
            TileSource::Region(name) => write!(f, "region '{}'", name),
        }
    }
}

/// Outcome of one task.
#[derive(Debug, Clone)]
pub struct TileNotification {
    pub key: TileKey,
    /// Payload on success, `None` on failure.
    pub data: Option<Bytes>,
    pub success: bool,
    pub source: TileSource,
}

impl TileNotification {
    pub fn succeeded(key: TileKey, data: Bytes, source: TileSource) -> Self {
        Self {
            key,
            data: Some(data),
            success: true,
            source,
        }
    }

    pub fn failed(key: TileKey, source: TileSource) -> Self {
        Self {
            key,
            data: None,
            success: false,
            source,
        }
    }
}

/// Receives task completions.
pub trait TileObserver: Send + Sync {
    fn on_tile(&self, notification: TileNotification);
}

impl<F> TileObserver for F
where
    F: Fn(TileNotification) + Send + Sync,
{
    fn on_tile(&self, notification: TileNotification) {
        self(notification)
    }
}

/// Handle returned by [`Cache::subscribe`](super::Cache::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Subscribed observers, shared between the cache and its tasks.
#[derive(Default)]
pub struct ObserverRegistry {
    next_id: AtomicU64,
    observers: RwLock<Vec<(ObserverId, Arc<dyn TileObserver>)>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn TileObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Delivers `notification` to every observer in subscription order.
    pub fn dispatch(&self, notification: TileNotification) {
        // Snapshot so observers may subscribe or unsubscribe while notified.
        let observers: Vec<Arc<dyn TileObserver>> = self
            .observers
            .read()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();

        if let Some((last, rest)) = observers.split_last() {
            for observer in rest {
                observer.on_tile(notification.clone());
            }
            last.on_tile(notification);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}
