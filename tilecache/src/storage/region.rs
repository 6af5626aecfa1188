//! Named pre-fetched regions and their metadata file.
//!
//! Each [`Region`] is backed by its own storage file. The set of regions is
//! small, so [`RegionIndexFile`] rewrites the whole JSON document on every
//! change. Writes go to a temporary file that is renamed over the old one,
//! so a crash never leaves a half-written index behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::StorageError;
use crate::coord::BoundingBox;

/// Version of the JSON document layout.
const INDEX_VERSION: u32 = 1;

/// Extension used for region storage files.
pub const REGION_FILE_EXTENSION: &str = "tiles";

/// Download state of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionStatus {
    /// Every tile was fetched and stored.
    Stored,
    /// Tiles are still being fetched.
    Downloading,
    /// Backing file was lost or a fetch failed; contents are incomplete.
    Invalid,
}

impl std::fmt::Display for RegionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RegionStatus::Stored => "stored",
            RegionStatus::Downloading => "downloading",
            RegionStatus::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Metadata for one named region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub bbox: BoundingBox,
    pub status: RegionStatus,
    /// Last time the region's status or contents changed.
    pub timestamp: DateTime<Utc>,
    /// Storage file name, relative to the cache directory.
    pub filename: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegionDocument {
    version: u32,
    regions: Vec<Region>,
}

/// Checks that a region name is usable.
pub fn validate_region_name(name: &str) -> Result<(), StorageError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed != name || name.chars().any(char::is_control) {
        return Err(StorageError::InvalidRegionName(name.to_string()));
    }
    Ok(())
}

/// Persistent map of region name to [`Region`].
#[derive(Debug)]
pub struct RegionIndexFile {
    path: PathBuf,
    regions: BTreeMap<String, Region>,
}

impl RegionIndexFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            regions: BTreeMap::new(),
        }
    }

    /// Loads the index, creating an empty one if the file is absent.
    ///
    /// Returns the number of regions loaded.
    pub fn initialize(&mut self) -> Result<usize, StorageError> {
        self.regions.clear();

        if !self.path.exists() {
            self.save()?;
            return Ok(0);
        }

        let content = fs::read_to_string(&self.path)?;
        let document: RegionDocument = serde_json::from_str(&content)?;
        if document.version != INDEX_VERSION {
            debug!(
                found = document.version,
                expected = INDEX_VERSION,
                "Region index version differs, reading anyway"
            );
        }
        for region in document.regions {
            self.regions.insert(region.name.clone(), region);
        }
        Ok(self.regions.len())
    }

    /// Writes the whole index atomically.
    pub fn save(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let document = RegionDocument {
            version: INDEX_VERSION,
            regions: self.regions.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&document)?;

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&Region> {
        self.regions.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Region> {
        self.regions.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.regions.contains_key(name)
    }

    pub fn insert(&mut self, region: Region) {
        self.regions.insert(region.name.clone(), region);
    }

    pub fn remove(&mut self, name: &str) -> Option<Region> {
        self.regions.remove(name)
    }

    /// Regions in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Picks a storage file name for a new region that no existing region
    /// uses.
    pub fn allocate_filename(&self, name: &str) -> String {
        let stem: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();

        let taken = |candidate: &str| self.regions.values().any(|r| r.filename == candidate);

        let mut candidate = format!("region-{}.{}", stem, REGION_FILE_EXTENSION);
        let mut n = 1;
        while taken(&candidate) {
            candidate = format!("region-{}-{}.{}", stem, n, REGION_FILE_EXTENSION);
            n += 1;
        }
        candidate
    }
}
