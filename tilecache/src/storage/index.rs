//! In-memory mirror of a storage file's key records.
//!
//! The index keeps two views of the same entries:
//!
//! - an ordered map from [`TileKey`] to [`IndexEntry`] for lookups, and
//! - an ordered set of `(counter, key)` pairs for victim selection, which
//!   behaves as a min-priority queue on the usage counter that can be
//!   re-prioritised in place when a counter changes.
//!
//! Both views are always updated together.

use std::collections::{BTreeMap, BTreeSet};

use crate::key::TileKey;

/// In-memory view of one key record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// File offset of the key record, used to rewrite it in place.
    pub record_offset: u64,
    /// File offset of the payload.
    pub data_offset: u64,
    /// Payload size in bytes.
    pub size: u32,
    /// Number of loads since the entry was stored.
    pub counter: u32,
}

/// Ordered key map plus usage ordering for one storage file.
#[derive(Debug, Default)]
pub struct KeyIndex {
    entries: BTreeMap<TileKey, IndexEntry>,
    usage: BTreeSet<(u32, TileKey)>,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entry.
    pub fn insert(&mut self, key: TileKey, entry: IndexEntry) {
        if let Some(old) = self.entries.insert(key, entry) {
            self.usage.remove(&(old.counter, key));
        }
        self.usage.insert((entry.counter, key));
    }

    /// Removes an entry, returning it if it existed.
    pub fn remove(&mut self, key: &TileKey) -> Option<IndexEntry> {
        let entry = self.entries.remove(key)?;
        self.usage.remove(&(entry.counter, *key));
        Some(entry)
    }

    pub fn get(&self, key: &TileKey) -> Option<&IndexEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Increments the usage counter of `key` and re-orders it.
    ///
    /// Returns the updated entry. The counter saturates at `u32::MAX`.
    pub fn bump(&mut self, key: &TileKey) -> Option<IndexEntry> {
        let entry = self.entries.get_mut(key)?;
        self.usage.remove(&(entry.counter, *key));
        entry.counter = entry.counter.saturating_add(1);
        self.usage.insert((entry.counter, *key));
        Some(*entry)
    }

    /// Entries ordered from least to most used.
    pub fn least_used(&self) -> impl Iterator<Item = (TileKey, IndexEntry)> + '_ {
        self.usage.iter().map(move |&(_, key)| (key, self.entries[&key]))
    }

    /// Number of candidates examined by eviction: the least-used half,
    /// rounded up, never less than one.
    pub fn eviction_window(&self) -> usize {
        self.entries.len().div_ceil(2).max(1)
    }

    pub fn keys(&self) -> impl Iterator<Item = TileKey> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TileKey, &IndexEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.usage.clear();
    }
}
