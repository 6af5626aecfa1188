//! Disk storage for tiles.
//!
//! [`Storage`] owns one main [`StorageFile`] for tiles fetched on demand and
//! one storage file per named [`Region`]. It keeps a union set of every
//! stored key so existence checks never wait on file I/O.
//!
//! # Locking
//!
//! ```text
//! ┌────────────────────────────── Storage ──────────────────────────────┐
//! │                                                                     │
//! │  files: Mutex ───────► main StorageFile                             │
//! │                        region StorageFiles (by region name)         │
//! │                        RegionIndexFile                              │
//! │                                                                     │
//! │  existing: RwLock ───► BTreeSet<TileKey> (union of all files)       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The two locks are disjoint. When both are needed, `files` is taken
//! first. [`Storage::is_exist`] only touches `existing`.

mod error;
mod file;
mod format;
mod index;
mod region;

pub use error::StorageError;
pub use file::{
    FileStats, InitOutcome, RegenerateReason, SaveOutcome, StorageFile, StorageFileOptions,
};
pub use format::{FileHeader, DEFAULT_BLOCK_CAPACITY, FORMAT_VERSION, HEADER_SIZE, SIGNATURE};
pub use index::{IndexEntry, KeyIndex};
pub use region::{validate_region_name, Region, RegionIndexFile, RegionStatus};

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::CacheConfig;
use crate::coord::BoundingBox;
use crate::key::TileKey;

/// Identifies the storage file that holds a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileId {
    Main,
    Region(String),
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileId::Main => f.write_str("main"),
            FileId::Region(name) => write!(f, "region '{}'", name),
        }
    }
}

/// Where a key is stored, as returned by [`Storage::get_key_pair`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLocation {
    pub key: TileKey,
    pub file: FileId,
    /// Snapshot of the index entry at lookup time.
    pub entry: IndexEntry,
}

/// Per-file statistics.
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub main: FileStats,
    pub regions: Vec<(String, FileStats)>,
    /// Distinct keys across all files.
    pub distinct_keys: usize,
}

struct Files {
    main: StorageFile,
    region_index: RegionIndexFile,
    region_files: BTreeMap<String, StorageFile>,
}

impl Files {
    fn get_mut(&mut self, id: &FileId) -> Result<&mut StorageFile, StorageError> {
        match id {
            FileId::Main => Ok(&mut self.main),
            FileId::Region(name) => self
                .region_files
                .get_mut(name)
                .ok_or_else(|| StorageError::RegionNotFound(name.clone())),
        }
    }

    /// Main file first, then regions in name order.
    fn locate(&self, key: &TileKey) -> Option<(FileId, IndexEntry)> {
        if let Some(entry) = self.main.entry(key) {
            return Some((FileId::Main, entry));
        }
        self.region_files
            .iter()
            .find_map(|(name, file)| file.entry(key).map(|e| (FileId::Region(name.clone()), e)))
    }

    fn contains(&self, key: &TileKey) -> bool {
        self.main.contains(key) || self.region_files.values().any(|f| f.contains(key))
    }

    fn all_keys(&self) -> BTreeSet<TileKey> {
        let mut keys: BTreeSet<TileKey> = self.main.keys().collect();
        for file in self.region_files.values() {
            keys.extend(file.keys());
        }
        keys
    }
}

/// Main and region storage files plus the union existence set.
pub struct Storage {
    directory: PathBuf,
    options: StorageFileOptions,
    files: Mutex<Files>,
    existing: RwLock<BTreeSet<TileKey>>,
}

impl Storage {
    /// Opens (or creates) all storage files under `config.directory`.
    ///
    /// Region files that had to be regenerated, or whose download never
    /// finished, are marked [`RegionStatus::Invalid`]. Any other failure is
    /// returned as an error.
    pub fn open(config: &CacheConfig, provider_hash: u32) -> Result<Self, StorageError> {
        let options = StorageFileOptions::new(
            config.max_file_size,
            config.eviction_tolerance,
            provider_hash,
            config.block_capacity,
        )?;
        let directory = config.directory.clone();
        fs::create_dir_all(&directory)?;

        let mut main = StorageFile::new(directory.join(&config.main_file), options);
        let outcome = main.initialize().map_err(|e| {
            error!(path = %main.path().display(), error = %e, "Failed to open main tile storage");
            e
        })?;
        if let InitOutcome::Regenerated(reason) = outcome {
            warn!(reason = ?reason, "Main tile storage was regenerated");
        }

        let mut region_index = RegionIndexFile::new(directory.join(&config.region_index_file));
        region_index.initialize()?;

        let mut region_files = BTreeMap::new();
        let mut dirty = false;
        let regions: Vec<Region> = region_index.iter().cloned().collect();
        for region in regions {
            let mut file = StorageFile::new(directory.join(&region.filename), options);
            let outcome = file.initialize()?;

            let lost = match &outcome {
                InitOutcome::Regenerated(reason) => {
                    warn!(region = %region.name, reason = ?reason, "Region storage regenerated");
                    true
                }
                InitOutcome::Created => region.status == RegionStatus::Stored,
                InitOutcome::Loaded { .. } => false,
            };
            let interrupted = region.status == RegionStatus::Downloading;

            if (lost || interrupted) && region.status != RegionStatus::Invalid {
                warn!(
                    region = %region.name,
                    interrupted,
                    "Marking region invalid"
                );
                if let Some(r) = region_index.get_mut(&region.name) {
                    r.status = RegionStatus::Invalid;
                    r.timestamp = Utc::now();
                }
                dirty = true;
            }
            region_files.insert(region.name, file);
        }
        if dirty {
            region_index.save()?;
        }

        let files = Files {
            main,
            region_index,
            region_files,
        };
        let existing = files.all_keys();

        info!(
            directory = %directory.display(),
            tiles = existing.len(),
            regions = files.region_files.len(),
            "Storage opened"
        );

        Ok(Self {
            directory,
            options,
            files: Mutex::new(files),
            existing: RwLock::new(existing),
        })
    }

    /// Returns true if any file stores `key`.
    ///
    /// Never waits on file I/O.
    pub fn is_exist(&self, key: &TileKey) -> bool {
        self.existing.read().contains(key)
    }

    /// Number of distinct keys across all files.
    pub fn tile_count(&self) -> usize {
        self.existing.read().len()
    }

    /// Finds the file holding `key`: main first, then regions by name.
    pub fn get_key_pair(&self, key: &TileKey) -> Option<KeyLocation> {
        let files = self.files.lock();
        files.locate(key).map(|(file, entry)| KeyLocation {
            key: *key,
            file,
            entry,
        })
    }

    /// Reads the payload at `location`, bumping its usage counter.
    ///
    /// Returns `Ok(None)` if the key was evicted since the lookup.
    pub fn load(&self, location: &KeyLocation) -> Result<Option<Vec<u8>>, StorageError> {
        let mut files = self.files.lock();
        if location.file == FileId::Main {
            self.recover_main(&mut files)?;
        }
        files.get_mut(&location.file)?.load(&location.key)
    }

    /// Empties the main file if an earlier write left it poisoned.
    ///
    /// Region files stay poisoned so their region can be reported invalid.
    fn recover_main(&self, files: &mut Files) -> Result<(), StorageError> {
        if !files.main.is_poisoned() {
            return Ok(());
        }
        warn!(path = %files.main.path().display(), "Main storage poisoned, flushing");
        files.main.flush()?;
        self.rebuild_existing(files);
        Ok(())
    }

    /// Stores a tile in the main file.
    pub fn save_main(&self, key: TileKey, data: &[u8]) -> Result<SaveOutcome, StorageError> {
        let mut files = self.files.lock();
        self.save_into(&mut files, &FileId::Main, key, data)
    }

    /// Stores a tile in a region's file and refreshes the region timestamp.
    ///
    /// Unlike [`Storage::save_main`], a full region file is never flushed:
    /// [`SaveOutcome::NeedToFlush`] is returned and the file is left as is.
    pub fn save_separate(
        &self,
        region: &str,
        key: TileKey,
        data: &[u8],
    ) -> Result<SaveOutcome, StorageError> {
        let mut files = self.files.lock();
        let outcome = self.save_into(&mut files, &FileId::Region(region.to_string()), key, data)?;

        if let Some(r) = files.region_index.get_mut(region) {
            r.timestamp = Utc::now();
        }
        files.region_index.save()?;
        Ok(outcome)
    }

    fn save_into(
        &self,
        files: &mut Files,
        target: &FileId,
        key: TileKey,
        data: &[u8],
    ) -> Result<SaveOutcome, StorageError> {
        if *target == FileId::Main {
            self.recover_main(files)?;
        }
        let (outcome, flushed) = {
            let file = files.get_mut(target)?;
            match file.save(key, data)? {
                // Only the main file may be emptied to make room. A full
                // region file is reported to the caller untouched.
                SaveOutcome::NeedToFlush if *target == FileId::Main => {
                    warn!(file = %target, "Storage full, flushing");
                    file.flush()?;
                    (file.save(key, data)?, true)
                }
                outcome => (outcome, false),
            }
        };

        if flushed {
            self.rebuild_existing(files);
        }

        if let SaveOutcome::Stored { evicted } = outcome {
            let evicted_gone = evicted.filter(|victim| !files.contains(victim));
            let mut existing = self.existing.write();
            existing.insert(key);
            if let Some(victim) = evicted_gone {
                existing.remove(&victim);
            }
            debug!(key = %key, file = %target, evicted = ?evicted, "Saved tile");
        }
        Ok(outcome)
    }

    /// Replaces the existence set with the keys currently in `files`.
    fn rebuild_existing(&self, files: &Files) {
        let keys = files.all_keys();
        *self.existing.write() = keys;
    }

    /// Empties the main file.
    pub fn flush_main(&self) -> Result<(), StorageError> {
        let mut files = self.files.lock();
        files.main.flush()?;
        self.rebuild_existing(&files);
        Ok(())
    }

    /// Registers a new region with its own empty storage file.
    ///
    /// The region starts in [`RegionStatus::Downloading`].
    pub fn region_add(&self, name: &str, bbox: BoundingBox) -> Result<Region, StorageError> {
        validate_region_name(name)?;
        let mut files = self.files.lock();
        if files.region_index.contains(name) {
            return Err(StorageError::RegionExists(name.to_string()));
        }

        let region = Region {
            name: name.to_string(),
            bbox,
            status: RegionStatus::Downloading,
            timestamp: Utc::now(),
            filename: files.region_index.allocate_filename(name),
        };

        let mut file = StorageFile::new(self.directory.join(&region.filename), self.options);
        file.initialize()?;
        if !file.is_empty() {
            // Leftover file from a region that was never cleaned up.
            file.flush()?;
        }

        files.region_index.insert(region.clone());
        files.region_index.save()?;
        files.region_files.insert(region.name.clone(), file);

        info!(region = %name, file = %region.filename, "Region added");
        Ok(region)
    }

    /// Renames a region. Its storage file keeps its name.
    pub fn region_rename(&self, old: &str, new: &str) -> Result<(), StorageError> {
        validate_region_name(new)?;
        let mut files = self.files.lock();
        if files.region_index.contains(new) {
            return Err(StorageError::RegionExists(new.to_string()));
        }
        let mut region = files
            .region_index
            .remove(old)
            .ok_or_else(|| StorageError::RegionNotFound(old.to_string()))?;

        region.name = new.to_string();
        region.timestamp = Utc::now();
        files.region_index.insert(region);
        if let Some(file) = files.region_files.remove(old) {
            files.region_files.insert(new.to_string(), file);
        }
        files.region_index.save()?;

        info!(from = %old, to = %new, "Region renamed");
        Ok(())
    }

    /// Removes a region and deletes its storage file.
    pub fn region_delete(&self, name: &str) -> Result<Region, StorageError> {
        let mut files = self.files.lock();
        let region = files
            .region_index
            .remove(name)
            .ok_or_else(|| StorageError::RegionNotFound(name.to_string()))?;
        files.region_index.save()?;

        if let Some(file) = files.region_files.remove(name) {
            file.remove()?;
        }
        self.rebuild_existing(&files);

        info!(region = %name, "Region deleted");
        Ok(region)
    }

    pub fn region_mark_stored(&self, name: &str) -> Result<(), StorageError> {
        self.set_region_status(name, RegionStatus::Stored)
    }

    pub fn region_mark_invalid(&self, name: &str) -> Result<(), StorageError> {
        self.set_region_status(name, RegionStatus::Invalid)
    }

    fn set_region_status(&self, name: &str, status: RegionStatus) -> Result<(), StorageError> {
        let mut files = self.files.lock();
        let region = files
            .region_index
            .get_mut(name)
            .ok_or_else(|| StorageError::RegionNotFound(name.to_string()))?;
        region.status = status;
        region.timestamp = Utc::now();
        files.region_index.save()?;
        debug!(region = %name, status = %status, "Region status changed");
        Ok(())
    }

    /// Snapshot of all regions in name order.
    pub fn regions(&self) -> Vec<Region> {
        self.files.lock().region_index.iter().cloned().collect()
    }

    pub fn region(&self, name: &str) -> Option<Region> {
        self.files.lock().region_index.get(name).cloned()
    }

    pub fn stats(&self) -> StorageStats {
        let files = self.files.lock();
        StorageStats {
            main: files.main.stats(),
            regions: files
                .region_files
                .iter()
                .map(|(name, file)| (name.clone(), file.stats()))
                .collect(),
            distinct_keys: self.existing.read().len(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("directory", &self.directory)
            .field("tiles", &self.tile_count())
            .finish()
    }
}
