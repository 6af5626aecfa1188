//! Block-linked storage file.
//!
//! A [`StorageFile`] holds tile payloads in a single file made of a header,
//! a singly-linked chain of fixed-capacity key blocks, and the payload bytes
//! written after them (see [`super::format`]). The in-memory [`KeyIndex`]
//! mirrors every populated record so lookups never touch the disk.
//!
//! # Crash safety
//!
//! Every multi-step write sets the header's corruption flag first and clears
//! it last. If the process dies in between, the next [`StorageFile::initialize`]
//! sees the flag and regenerates the file instead of serving torn data.
//!
//! # Size cap
//!
//! The file grows until `max_size`. After that, saves evict the least-used
//! entries (see [`StorageFile::save`]), allowing at most `tolerance` bytes of
//! overshoot before asking the caller to flush.
//!
//! File handles are opened per operation and never held across calls.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{debug, info, warn};

use super::error::StorageError;
use super::format::{
    block_size, record_offset, BlockHeader, FileHeader, KeyRecord, StoredEntry,
    BLOCK_COUNT_OFFSET, BLOCK_HEADER_SIZE, CORRUPTION_FLAG_OFFSET, DEFAULT_BLOCK_CAPACITY,
    FORMAT_VERSION, HEADER_SIZE, RECORD_COUNTER_OFFSET, SIGNATURE,
};
use super::index::{IndexEntry, KeyIndex};
use crate::key::TileKey;

/// Parameters shared by every storage file of one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageFileOptions {
    max_size: u64,
    tolerance: u64,
    provider_hash: u32,
    block_capacity: u32,
}

impl StorageFileOptions {
    /// Validates and builds file options.
    ///
    /// `max_size + tolerance` must be addressable by the format's signed
    /// 32-bit offsets.
    pub fn new(
        max_size: u64,
        tolerance: u64,
        provider_hash: u32,
        block_capacity: u32,
    ) -> Result<Self, StorageError> {
        if max_size.saturating_add(tolerance) > i32::MAX as u64 {
            return Err(StorageError::MaxSizeTooLarge(max_size.saturating_add(tolerance)));
        }
        Ok(Self {
            max_size,
            tolerance,
            provider_hash,
            block_capacity: block_capacity.max(1),
        })
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn tolerance(&self) -> u64 {
        self.tolerance
    }

    pub fn provider_hash(&self) -> u32 {
        self.provider_hash
    }

    pub fn block_capacity(&self) -> u32 {
        self.block_capacity
    }
}

impl Default for StorageFileOptions {
    fn default() -> Self {
        Self {
            max_size: 256 * 1024 * 1024,
            tolerance: 4 * 1024 * 1024,
            provider_hash: 0,
            block_capacity: DEFAULT_BLOCK_CAPACITY,
        }
    }
}

/// Why an existing file was wiped during initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegenerateReason {
    /// Written by a different format version.
    StaleVersion(u8),
    /// A write sequence was interrupted.
    Corrupted,
    /// Tiles belong to a different imagery provider.
    ProviderChanged,
    /// Block capacity differs from the configured one.
    CapacityChanged(u32),
    /// File is shorter than its header.
    Truncated,
    /// Block chain or a record points outside the file.
    BrokenChain(String),
}

/// Result of [`StorageFile::initialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// File did not exist and was created empty.
    Created,
    /// Existing file was read; `entries` records were indexed.
    Loaded { entries: usize },
    /// Existing file was unusable and has been recreated empty. Any index
    /// the caller derived from this file must be discarded.
    Regenerated(RegenerateReason),
}

impl InitOutcome {
    pub fn is_regenerated(&self) -> bool {
        matches!(self, InitOutcome::Regenerated(_))
    }
}

/// Result of a successful [`StorageFile::save`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Payload written. `evicted` names the entry that was replaced to make
    /// room, if any.
    Stored { evicted: Option<TileKey> },
    /// Key already stored in this file; nothing written.
    AlreadyPresent,
    /// No room even after eviction; the caller must flush the file.
    NeedToFlush,
}

/// In-memory position of one block.
#[derive(Debug, Clone, Copy)]
struct BlockSlot {
    offset: u64,
    count: u32,
}

/// Summary of a file's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStats {
    pub entries: usize,
    pub blocks: usize,
    pub file_size: u64,
    pub max_size: u64,
}

/// A single block-linked storage file and its index.
#[derive(Debug)]
pub struct StorageFile {
    path: PathBuf,
    options: StorageFileOptions,
    header: FileHeader,
    index: KeyIndex,
    blocks: Vec<BlockSlot>,
    file_size: u64,
    /// Set when a bracketed write fails, leaving the corruption flag on disk.
    poisoned: bool,
}

impl StorageFile {
    /// Creates a handle for the file at `path`. No I/O happens until
    /// [`StorageFile::initialize`].
    pub fn new(path: impl Into<PathBuf>, options: StorageFileOptions) -> Self {
        Self {
            path: path.into(),
            header: Self::fresh_header(&options),
            options,
            index: KeyIndex::new(),
            blocks: Vec::new(),
            file_size: 0,
            poisoned: false,
        }
    }

    fn fresh_header(options: &StorageFileOptions) -> FileHeader {
        FileHeader::new(
            options.max_size as i32,
            options.provider_hash,
            options.block_capacity,
        )
    }

    /// Opens the file and rebuilds the index.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::BadSignature`] if the file is not a storage
    /// file, or an I/O error. Stale or corrupted files are not errors: they
    /// are recreated and reported as [`InitOutcome::Regenerated`].
    pub fn initialize(&mut self) -> Result<InitOutcome, StorageError> {
        self.reset_memory();

        if !self.path.exists() {
            self.create()?;
            info!(path = %self.path.display(), "Created storage file");
            return Ok(InitOutcome::Created);
        }

        let file = File::open(&self.path)?;
        let file_size = file.metadata()?.len();
        if file_size < HEADER_SIZE {
            return self.regenerate(RegenerateReason::Truncated);
        }

        let mut reader = BufReader::new(file);
        let header = FileHeader::read_from(&mut reader)?;
        if header.signature != SIGNATURE {
            return Err(StorageError::BadSignature {
                path: self.path.clone(),
                found: header.signature,
            });
        }
        if let Some(reason) = self.check_header(&header) {
            return self.regenerate(reason);
        }

        self.file_size = file_size;
        if let Err(detail) = self.read_blocks(&mut reader, header.block_count)? {
            return self.regenerate(RegenerateReason::BrokenChain(detail));
        }

        self.header = header;
        self.header.max_size = self.options.max_size as i32;

        info!(
            path = %self.path.display(),
            entries = self.index.len(),
            blocks = self.blocks.len(),
            size = self.file_size,
            "Loaded storage file"
        );
        Ok(InitOutcome::Loaded {
            entries: self.index.len(),
        })
    }

    fn check_header(&self, header: &FileHeader) -> Option<RegenerateReason> {
        if header.version != FORMAT_VERSION {
            Some(RegenerateReason::StaleVersion(header.version))
        } else if header.corrupted {
            Some(RegenerateReason::Corrupted)
        } else if header.provider_hash != self.options.provider_hash {
            Some(RegenerateReason::ProviderChanged)
        } else if header.block_capacity != self.options.block_capacity {
            Some(RegenerateReason::CapacityChanged(header.block_capacity))
        } else {
            None
        }
    }

    /// Walks the block chain filling the index.
    ///
    /// The outer `Result` carries I/O failures; the inner one describes a
    /// structurally broken chain.
    fn read_blocks<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        block_count: u32,
    ) -> Result<Result<(), String>, StorageError> {
        let capacity = self.options.block_capacity;
        let mut offset = HEADER_SIZE;

        for n in 0..block_count {
            if offset < HEADER_SIZE || offset + block_size(capacity) > self.file_size {
                return Ok(Err(format!("block {} at offset {} outside file", n, offset)));
            }

            reader.seek(SeekFrom::Start(offset))?;
            let block = BlockHeader::read_from(reader)?;
            if block.count > capacity {
                return Ok(Err(format!(
                    "block {} claims {} records (capacity {})",
                    n, block.count, capacity
                )));
            }

            for i in 0..block.count {
                let record = KeyRecord::read_from(reader)?;
                let Ok(key) = TileKey::from_raw(record.key) else {
                    return Ok(Err(format!("block {} record {} has invalid key", n, i)));
                };
                let entry = record.entry;
                if entry.offset < 0 || entry.offset as u64 + entry.size as u64 > self.file_size
                {
                    return Ok(Err(format!("payload of {} outside file", key)));
                }
                self.index.insert(
                    key,
                    IndexEntry {
                        record_offset: record_offset(offset, i),
                        data_offset: entry.offset as u64,
                        size: entry.size,
                        counter: entry.counter,
                    },
                );
            }
            self.blocks.push(BlockSlot {
                offset,
                count: block.count,
            });

            let is_last = n + 1 == block_count;
            match (block.next, is_last) {
                (0, true) => {}
                (0, false) => return Ok(Err(format!("chain ends after {} blocks", n + 1))),
                (_, true) => return Ok(Err("last block links further".to_string())),
                (next, false) if next as u64 <= offset => {
                    return Ok(Err(format!("block {} links backwards", n)))
                }
                (next, false) => offset = next as u64,
            }
        }
        Ok(Ok(()))
    }

    fn regenerate(&mut self, reason: RegenerateReason) -> Result<InitOutcome, StorageError> {
        warn!(
            path = %self.path.display(),
            reason = ?reason,
            "Storage file unusable, regenerating"
        );
        self.create()?;
        Ok(InitOutcome::Regenerated(reason))
    }

    /// Creates (or truncates) the file with a fresh header.
    fn create(&mut self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = File::create(&self.path)?;
        let header = Self::fresh_header(&self.options);
        header.write_to(&mut file)?;
        file.flush()?;

        self.reset_memory();
        self.header = header;
        self.file_size = HEADER_SIZE;
        Ok(())
    }

    fn reset_memory(&mut self) {
        self.index.clear();
        self.blocks.clear();
        self.header = Self::fresh_header(&self.options);
        self.file_size = 0;
        self.poisoned = false;
    }

    fn open_rw(&self) -> io::Result<File> {
        OpenOptions::new().read(true).write(true).open(&self.path)
    }

    fn write_corruption_flag(file: &mut File, set: bool) -> io::Result<()> {
        file.seek(SeekFrom::Start(CORRUPTION_FLAG_OFFSET))?;
        file.write_u8(set as u8)?;
        Ok(())
    }

    /// Sets the corruption flag on disk. Must be paired with
    /// [`StorageFile::mark_operations_end`].
    pub fn mark_operations_begin(&self) -> Result<(), StorageError> {
        let mut file = self.open_rw()?;
        Self::write_corruption_flag(&mut file, true)?;
        Ok(())
    }

    /// Clears the corruption flag on disk.
    pub fn mark_operations_end(&self) -> Result<(), StorageError> {
        let mut file = self.open_rw()?;
        Self::write_corruption_flag(&mut file, false)?;
        Ok(())
    }

    /// Runs `op` with the corruption flag set, clearing it only if `op`
    /// succeeds.
    ///
    /// If `op` fails the flag stays set and the file is poisoned: every later
    /// load or save fails until [`StorageFile::initialize`] or
    /// [`StorageFile::flush`] runs.
    fn bracketed<T>(
        &mut self,
        op: impl FnOnce(&mut File) -> io::Result<T>,
    ) -> Result<T, StorageError> {
        self.check_poisoned()?;
        let mut file = self.open_rw()?;
        Self::write_corruption_flag(&mut file, true)?;
        let value = match op(&mut file) {
            Ok(value) => value,
            Err(e) => {
                self.poisoned = true;
                warn!(path = %self.path.display(), error = %e, "Write interrupted, storage file poisoned");
                return Err(e.into());
            }
        };
        Self::write_corruption_flag(&mut file, false)?;
        file.flush()?;
        Ok(value)
    }

    fn check_poisoned(&self) -> Result<(), StorageError> {
        if self.poisoned {
            return Err(StorageError::Poisoned(self.path.clone()));
        }
        Ok(())
    }

    /// True after a write failed partway. See [`StorageFile::flush`].
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Reads the payload for `key`, bumping its usage counter in memory and
    /// on disk.
    ///
    /// Returns `Ok(None)` if the key is not stored in this file.
    pub fn load(&mut self, key: &TileKey) -> Result<Option<Vec<u8>>, StorageError> {
        self.check_poisoned()?;
        let Some(entry) = self.index.get(key).copied() else {
            return Ok(None);
        };

        let mut file = self.open_rw()?;
        let mut data = vec![0u8; entry.size as usize];
        file.seek(SeekFrom::Start(entry.data_offset))?;
        file.read_exact(&mut data)?;

        // Only a completed read counts as a use.
        let counter = entry.counter.saturating_add(1);
        file.seek(SeekFrom::Start(entry.record_offset + RECORD_COUNTER_OFFSET))?;
        file.write_u32::<LittleEndian>(counter)?;
        self.index.bump(key);

        debug!(key = %key, size = entry.size, counter, "Loaded tile");
        Ok(Some(data))
    }

    /// Stores `data` under `key`.
    ///
    /// Placement, in order of preference:
    /// 1. first block of an empty file, payload right after it;
    /// 2. free record in an existing block, payload at end of file;
    /// 3. new block linked at end of file, payload right after it;
    /// 4. eviction (see below) once growth would pass `max_size`.
    ///
    /// Eviction scans the least-used half of the entries and reuses the first
    /// slot large enough for `data`. If none fits, the least-used entry's
    /// record is pointed at a payload appended at end of file, provided the
    /// file stays within `max_size + tolerance`; otherwise
    /// [`SaveOutcome::NeedToFlush`] is returned and nothing is written.
    pub fn save(&mut self, key: TileKey, data: &[u8]) -> Result<SaveOutcome, StorageError> {
        self.check_poisoned()?;
        if self.index.contains(&key) {
            return Ok(SaveOutcome::AlreadyPresent);
        }

        let size = data.len() as u64;
        let block_bytes = block_size(self.options.block_capacity);
        if HEADER_SIZE + block_bytes + size > self.options.max_size {
            return Err(StorageError::EntryTooLarge {
                size: data.len(),
                max: self.options.max_size,
            });
        }

        if self.blocks.is_empty() {
            let block_offset = self.file_size;
            if block_offset + block_bytes + size > self.options.max_size {
                return self.replace_key(key, data);
            }
            self.append_block(key, data, None)?;
            return Ok(SaveOutcome::Stored { evicted: None });
        }

        let capacity = self.options.block_capacity;
        if let Some(slot) = self.blocks.iter().position(|b| b.count < capacity) {
            if self.file_size + size > self.options.max_size {
                return self.replace_key(key, data);
            }
            self.append_record(slot, key, data)?;
            return Ok(SaveOutcome::Stored { evicted: None });
        }

        if self.file_size + block_bytes + size > self.options.max_size {
            return self.replace_key(key, data);
        }
        let last = self.blocks.len() - 1;
        self.append_block(key, data, Some(last))?;
        Ok(SaveOutcome::Stored { evicted: None })
    }

    /// Writes a new block at end of file holding one record, with the payload
    /// right after the record array. `link_from` is the index of the block
    /// whose `next` pointer must be updated.
    fn append_block(
        &mut self,
        key: TileKey,
        data: &[u8],
        link_from: Option<usize>,
    ) -> Result<(), StorageError> {
        let capacity = self.options.block_capacity;
        let block_offset = self.file_size;
        let data_offset = block_offset + block_size(capacity);
        let record = KeyRecord::new(
            key,
            StoredEntry {
                offset: data_offset as i32,
                size: data.len() as u32,
                counter: 0,
            },
        );

        let mut image = Vec::with_capacity(block_size(capacity) as usize);
        BlockHeader { count: 1, next: 0 }.write_to(&mut image)?;
        record.write_to(&mut image)?;
        image.resize(block_size(capacity) as usize, 0);

        let link_offset = link_from.map(|i| self.blocks[i].offset + 4);
        let block_count = self.blocks.len() as u32 + 1;

        self.bracketed(|file| {
            file.seek(SeekFrom::Start(data_offset))?;
            file.write_all(data)?;
            file.seek(SeekFrom::Start(block_offset))?;
            file.write_all(&image)?;
            if let Some(link) = link_offset {
                file.seek(SeekFrom::Start(link))?;
                file.write_i32::<LittleEndian>(block_offset as i32)?;
            }
            file.seek(SeekFrom::Start(BLOCK_COUNT_OFFSET))?;
            file.write_u32::<LittleEndian>(block_count)
        })?;

        self.blocks.push(BlockSlot {
            offset: block_offset,
            count: 1,
        });
        self.header.block_count = block_count;
        self.file_size = data_offset + data.len() as u64;
        self.index.insert(
            key,
            IndexEntry {
                record_offset: record_offset(block_offset, 0),
                data_offset,
                size: data.len() as u32,
                counter: 0,
            },
        );
        debug!(key = %key, block = block_count - 1, "Stored tile in new block");
        Ok(())
    }

    /// Appends a record to block `slot`, payload at end of file.
    fn append_record(&mut self, slot: usize, key: TileKey, data: &[u8]) -> Result<(), StorageError> {
        let block = self.blocks[slot];
        let data_offset = self.file_size;
        let rec_offset = record_offset(block.offset, block.count);
        let record = KeyRecord::new(
            key,
            StoredEntry {
                offset: data_offset as i32,
                size: data.len() as u32,
                counter: 0,
            },
        );

        self.bracketed(|file| {
            file.seek(SeekFrom::Start(data_offset))?;
            file.write_all(data)?;
            file.seek(SeekFrom::Start(rec_offset))?;
            record.write_to(file)?;
            file.seek(SeekFrom::Start(block.offset))?;
            file.write_u32::<LittleEndian>(block.count + 1)
        })?;

        self.blocks[slot].count += 1;
        self.file_size = data_offset + data.len() as u64;
        self.index.insert(
            key,
            IndexEntry {
                record_offset: rec_offset,
                data_offset,
                size: data.len() as u32,
                counter: 0,
            },
        );
        debug!(key = %key, block = slot, "Stored tile");
        Ok(())
    }

    /// Evicts a least-used entry to make room for `key`.
    fn replace_key(&mut self, key: TileKey, data: &[u8]) -> Result<SaveOutcome, StorageError> {
        let size = data.len() as u64;
        let window = self.index.eviction_window();

        let good = self
            .index
            .least_used()
            .take(window)
            .find(|(_, entry)| entry.size as u64 >= size);

        if let Some((victim, slot)) = good {
            self.rewrite_entry(victim, slot, key, data, slot.data_offset)?;
            debug!(key = %key, victim = %victim, "Replaced tile in place");
            return Ok(SaveOutcome::Stored {
                evicted: Some(victim),
            });
        }

        let Some((victim, slot)) = self.index.least_used().next() else {
            return Ok(SaveOutcome::NeedToFlush);
        };
        let data_offset = self.file_size;
        if data_offset + size > self.options.max_size + self.options.tolerance {
            debug!(key = %key, size = self.file_size, "Eviction tolerance exhausted");
            return Ok(SaveOutcome::NeedToFlush);
        }
        self.rewrite_entry(victim, slot, key, data, data_offset)?;
        self.file_size = self.file_size.max(data_offset + size);
        debug!(key = %key, victim = %victim, "Replaced tile with appended payload");
        Ok(SaveOutcome::Stored {
            evicted: Some(victim),
        })
    }

    /// Points `victim`'s record at `key`'s payload written at `data_offset`.
    fn rewrite_entry(
        &mut self,
        victim: TileKey,
        slot: IndexEntry,
        key: TileKey,
        data: &[u8],
        data_offset: u64,
    ) -> Result<(), StorageError> {
        let record = KeyRecord::new(
            key,
            StoredEntry {
                offset: data_offset as i32,
                size: data.len() as u32,
                counter: 0,
            },
        );

        self.bracketed(|file| {
            file.seek(SeekFrom::Start(data_offset))?;
            file.write_all(data)?;
            file.seek(SeekFrom::Start(slot.record_offset))?;
            record.write_to(file)
        })?;

        self.index.remove(&victim);
        self.index.insert(
            key,
            IndexEntry {
                record_offset: slot.record_offset,
                data_offset,
                size: data.len() as u32,
                counter: 0,
            },
        );
        Ok(())
    }

    /// Truncates the file to an empty header and clears the index.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        let mut file = self.open_rw()?;
        let header = Self::fresh_header(&self.options);
        file.set_len(HEADER_SIZE)?;
        file.seek(SeekFrom::Start(0))?;
        header.write_to(&mut file)?;
        file.flush()?;

        self.reset_memory();
        self.header = header;
        self.file_size = HEADER_SIZE;
        info!(path = %self.path.display(), "Flushed storage file");
        Ok(())
    }

    /// Deletes the file from disk and clears the index.
    pub fn remove(mut self) -> Result<(), StorageError> {
        self.reset_memory();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn options(&self) -> &StorageFileOptions {
        &self.options
    }

    pub fn index(&self) -> &KeyIndex {
        &self.index
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.index.contains(key)
    }

    pub fn entry(&self, key: &TileKey) -> Option<IndexEntry> {
        self.index.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = TileKey> + '_ {
        self.index.keys()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Current file size in bytes as tracked in memory.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn stats(&self) -> FileStats {
        FileStats {
            entries: self.index.len(),
            blocks: self.blocks.len(),
            file_size: self.file_size,
            max_size: self.options.max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use tempfile::TempDir;

    fn options(max_size: u64, tolerance: u64) -> StorageFileOptions {
        StorageFileOptions::new(max_size, tolerance, 42, 4).unwrap()
    }

    fn open(dir: &TempDir, opts: StorageFileOptions) -> (StorageFile, InitOutcome) {
        let mut file = StorageFile::new(dir.path().join("main.tiles"), opts);
        let outcome = file.initialize().unwrap();
        (file, outcome)
    }

    fn key(i: u32) -> TileKey {
        TileKey::new(i, i, 10)
    }

    #[test]
    fn test_options_reject_oversized_cap() {
        let result = StorageFileOptions::new(i32::MAX as u64, 1, 0, 100);
        assert!(matches!(result, Err(StorageError::MaxSizeTooLarge(_))));
    }

    #[test]
    fn test_initialize_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let (file, outcome) = open(&dir, options(1 << 20, 0));

        assert_eq!(outcome, InitOutcome::Created);
        assert!(file.path().exists());
        assert_eq!(file.file_size(), HEADER_SIZE);
        assert_eq!(fs::metadata(file.path()).unwrap().len(), HEADER_SIZE);
        assert!(file.is_empty());
    }

    #[test]
    fn test_initialize_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let mut file = StorageFile::new(dir.path().join("a/b/main.tiles"), options(1 << 20, 0));
        assert_eq!(file.initialize().unwrap(), InitOutcome::Created);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let (mut file, _) = open(&dir, options(1 << 20, 0));
        let k = TileKey::new(1, 2, 3);

        let outcome = file.save(k, b"abcd").unwrap();
        assert_eq!(outcome, SaveOutcome::Stored { evicted: None });

        let data = file.load(&k).unwrap();
        assert_eq!(data.as_deref(), Some(&b"abcd"[..]));
        assert_eq!(file.entry(&k).unwrap().counter, 1);
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = TempDir::new().unwrap();
        let (mut file, _) = open(&dir, options(1 << 20, 0));
        assert!(file.load(&key(1)).unwrap().is_none());
    }

    #[test]
    fn test_save_existing_key_is_noop() {
        let dir = TempDir::new().unwrap();
        let (mut file, _) = open(&dir, options(1 << 20, 0));
        file.save(key(1), b"first").unwrap();
        let size = file.file_size();

        assert_eq!(file.save(key(1), b"second").unwrap(), SaveOutcome::AlreadyPresent);
        assert_eq!(file.file_size(), size);
        assert_eq!(file.load(&key(1)).unwrap().unwrap(), b"first");
    }

    #[test]
    fn test_blocks_chain_and_reload() {
        let dir = TempDir::new().unwrap();
        let opts = options(1 << 20, 0);
        let (mut file, _) = open(&dir, opts);

        // Capacity 4, so 10 entries span three blocks.
        for i in 0..10 {
            file.save(key(i), &vec![i as u8; 16 + i as usize]).unwrap();
        }
        assert_eq!(file.stats().blocks, 3);
        assert_eq!(file.header().block_count, 3);
        file.load(&key(7)).unwrap();

        let (mut reopened, outcome) = open(&dir, opts);
        assert_eq!(outcome, InitOutcome::Loaded { entries: 10 });
        assert_eq!(reopened.stats().blocks, 3);
        assert_eq!(reopened.entry(&key(7)).unwrap().counter, 1);
        for i in 0..10 {
            let data = reopened.load(&key(i)).unwrap().unwrap();
            assert_eq!(data, vec![i as u8; 16 + i as usize]);
        }
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let opts = options(1 << 20, 0);
        let (mut file, _) = open(&dir, opts);
        for i in 0..6 {
            file.save(key(i), b"payload").unwrap();
        }

        let (first, _) = open(&dir, opts);
        let (second, _) = open(&dir, opts);
        let a: Vec<_> = first.index().iter().map(|(k, e)| (*k, *e)).collect();
        let b: Vec<_> = second.index().iter().map(|(k, e)| (*k, *e)).collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), 6);
    }

    #[test]
    fn test_bad_signature_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main.tiles");
        fs::write(&path, vec![0xFFu8; 64]).unwrap();

        let mut file = StorageFile::new(&path, options(1 << 20, 0));
        let result = file.initialize();
        assert!(matches!(result, Err(StorageError::BadSignature { .. })));
    }

    #[test]
    fn test_interrupted_write_regenerates() {
        let dir = TempDir::new().unwrap();
        let opts = options(1 << 20, 0);
        let (mut file, _) = open(&dir, opts);
        file.save(key(1), b"data").unwrap();

        // Simulate a crash between begin and end.
        file.mark_operations_begin().unwrap();
        drop(file);

        let (file, outcome) = open(&dir, opts);
        assert_eq!(outcome, InitOutcome::Regenerated(RegenerateReason::Corrupted));
        assert!(file.is_empty());
        assert_eq!(fs::metadata(file.path()).unwrap().len(), HEADER_SIZE);

        // Healed file opens cleanly.
        let (_, outcome) = open(&dir, opts);
        assert_eq!(outcome, InitOutcome::Loaded { entries: 0 });
    }

    #[test]
    fn test_failed_write_poisons_file() {
        let dir = TempDir::new().unwrap();
        let opts = options(1 << 20, 0);
        let (mut file, _) = open(&dir, opts);
        file.save(key(1), b"data").unwrap();

        let result: Result<(), _> =
            file.bracketed(|_| Err(io::Error::new(io::ErrorKind::WriteZero, "disk full")));
        assert!(matches!(result, Err(StorageError::Io(_))));
        assert!(file.is_poisoned());

        // Later writes and reads refuse instead of clearing the flag.
        assert!(matches!(
            file.save(key(2), b"more"),
            Err(StorageError::Poisoned(_))
        ));
        assert!(matches!(file.load(&key(1)), Err(StorageError::Poisoned(_))));
        drop(file);

        let (file, outcome) = open(&dir, opts);
        assert_eq!(outcome, InitOutcome::Regenerated(RegenerateReason::Corrupted));
        assert!(!file.is_poisoned());
    }

    #[test]
    fn test_flush_clears_poison() {
        let dir = TempDir::new().unwrap();
        let (mut file, _) = open(&dir, options(1 << 20, 0));

        let _ = file.bracketed(|_| -> io::Result<()> { Err(io::Error::other("torn")) });
        assert!(file.is_poisoned());

        file.flush().unwrap();
        assert!(!file.is_poisoned());
        file.save(key(3), b"abc").unwrap();
        assert_eq!(file.load(&key(3)).unwrap().unwrap(), b"abc");
    }

    #[test]
    fn test_failed_read_does_not_count_as_use() {
        let dir = TempDir::new().unwrap();
        let (mut file, _) = open(&dir, options(1 << 20, 0));
        file.save(key(1), b"payload").unwrap();

        // Cut the payload short on disk.
        let len = fs::metadata(file.path()).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(file.path())
            .unwrap()
            .set_len(len - 3)
            .unwrap();

        assert!(matches!(file.load(&key(1)), Err(StorageError::Io(_))));
        assert_eq!(file.entry(&key(1)).unwrap().counter, 0);
    }

    #[test]
    fn test_stale_version_regenerates() {
        let dir = TempDir::new().unwrap();
        let opts = options(1 << 20, 0);
        let (mut file, _) = open(&dir, opts);
        file.save(key(1), b"data").unwrap();

        let mut bytes = fs::read(file.path()).unwrap();
        bytes[4] = FORMAT_VERSION + 1;
        fs::write(file.path(), bytes).unwrap();

        let (file, outcome) = open(&dir, opts);
        assert_eq!(
            outcome,
            InitOutcome::Regenerated(RegenerateReason::StaleVersion(FORMAT_VERSION + 1))
        );
        assert!(file.is_empty());
    }

    #[test]
    fn test_provider_change_regenerates() {
        let dir = TempDir::new().unwrap();
        let (mut file, _) = open(&dir, options(1 << 20, 0));
        file.save(key(1), b"data").unwrap();

        let other = StorageFileOptions::new(1 << 20, 0, 7, 4).unwrap();
        let (_, outcome) = open(&dir, other);
        assert_eq!(outcome, InitOutcome::Regenerated(RegenerateReason::ProviderChanged));
    }

    #[test]
    fn test_truncated_payload_regenerates() {
        let dir = TempDir::new().unwrap();
        let opts = options(1 << 20, 0);
        let (mut file, _) = open(&dir, opts);
        file.save(key(1), &[7u8; 100]).unwrap();

        let len = fs::metadata(file.path()).unwrap().len();
        let f = OpenOptions::new().write(true).open(file.path()).unwrap();
        f.set_len(len - 10).unwrap();

        let (_, outcome) = open(&dir, opts);
        assert!(matches!(
            outcome,
            InitOutcome::Regenerated(RegenerateReason::BrokenChain(_))
        ));
    }

    #[test]
    fn test_flush_empties_file() {
        let dir = TempDir::new().unwrap();
        let opts = options(1 << 20, 0);
        let (mut file, _) = open(&dir, opts);
        for i in 0..5 {
            file.save(key(i), b"data").unwrap();
        }

        file.flush().unwrap();
        assert!(file.is_empty());
        assert_eq!(file.file_size(), HEADER_SIZE);
        assert_eq!(fs::metadata(file.path()).unwrap().len(), HEADER_SIZE);

        // Usable again after flush.
        file.save(key(9), b"again").unwrap();
        let (reopened, outcome) = open(&dir, opts);
        assert_eq!(outcome, InitOutcome::Loaded { entries: 1 });
        assert!(reopened.contains(&key(9)));
    }

    #[test]
    fn test_entry_too_large() {
        let dir = TempDir::new().unwrap();
        let (mut file, _) = open(&dir, options(200, 0));
        let result = file.save(key(1), &[0u8; 200]);
        assert!(matches!(result, Err(StorageError::EntryTooLarge { .. })));
    }

    /// File that holds exactly one block and `n` payloads of `payload` bytes.
    fn capped(n: u64, payload: u64) -> u64 {
        HEADER_SIZE + block_size(4) + n * payload
    }

    #[test]
    fn test_good_replace_reuses_slot() {
        let dir = TempDir::new().unwrap();
        let (mut file, _) = open(&dir, options(capped(3, 100), 0));
        for i in 0..3 {
            file.save(key(i), &[i as u8; 100]).unwrap();
        }
        // Make key 0 and key 2 popular; key 1 becomes the victim.
        file.load(&key(0)).unwrap();
        file.load(&key(2)).unwrap();
        let size = file.file_size();

        let outcome = file.save(key(10), &[9u8; 80]).unwrap();
        assert_eq!(
            outcome,
            SaveOutcome::Stored {
                evicted: Some(key(1))
            }
        );
        assert_eq!(file.file_size(), size);
        assert!(!file.contains(&key(1)));
        assert_eq!(file.load(&key(10)).unwrap().unwrap(), vec![9u8; 80]);
        assert_eq!(file.entry(&key(10)).unwrap().counter, 1);
    }

    #[test]
    fn test_bad_replace_appends_within_tolerance() {
        let dir = TempDir::new().unwrap();
        let (mut file, _) = open(&dir, options(capped(3, 100), 150));
        for i in 0..3 {
            file.save(key(i), &[i as u8; 100]).unwrap();
        }
        let size = file.file_size();

        // Larger than every slot: least-used entry is relocated to EOF.
        let outcome = file.save(key(10), &[1u8; 120]).unwrap();
        assert!(matches!(outcome, SaveOutcome::Stored { evicted: Some(_) }));
        assert_eq!(file.file_size(), size + 120);
        assert_eq!(file.len(), 3);

        // Tolerance exhausted now.
        let outcome = file.save(key(11), &[1u8; 120]).unwrap();
        assert_eq!(outcome, SaveOutcome::NeedToFlush);
        assert!(!file.contains(&key(11)));

        // Relocated entry survives a reopen.
        let opts = *file.options();
        let (mut reopened, _) = open(&dir, opts);
        assert_eq!(reopened.load(&key(10)).unwrap().unwrap(), vec![1u8; 120]);
    }

    #[test]
    fn test_good_replace_only_scans_least_used_half() {
        let dir = TempDir::new().unwrap();
        // One full block of 220 payload bytes plus 40 bytes of headroom: too
        // little for a second block, so the next save must evict.
        let max = HEADER_SIZE + block_size(4) + 260;
        let (mut file, _) = open(&dir, options(max, 1000));
        // Slots: 10, 10, 100, 100 bytes.
        file.save(key(0), &[0u8; 10]).unwrap();
        file.save(key(1), &[0u8; 10]).unwrap();
        file.save(key(2), &[0u8; 100]).unwrap();
        file.save(key(3), &[0u8; 100]).unwrap();
        // Large slots are the most used: outside the scanned half.
        file.load(&key(2)).unwrap();
        file.load(&key(3)).unwrap();
        file.load(&key(1)).unwrap();

        let size = file.file_size();
        let outcome = file.save(key(9), &[5u8; 50]).unwrap();

        // Neither small slot fits, so key 0 (least used) is relocated.
        assert_eq!(
            outcome,
            SaveOutcome::Stored {
                evicted: Some(key(0))
            }
        );
        assert!(file.file_size() > size);
        assert!(file.contains(&key(2)));
        assert!(file.contains(&key(3)));
    }

    #[test]
    fn test_size_never_exceeds_cap_plus_tolerance() {
        let dir = TempDir::new().unwrap();
        let max = capped(8, 64);
        let tolerance = 256;
        let (mut file, _) = open(&dir, options(max, tolerance));
        let mut rng = rand::rng();

        for i in 0..500u32 {
            let len = rng.random_range(1..=96usize);
            let before = file.file_size();
            match file.save(key(i), &vec![1u8; len]).unwrap() {
                SaveOutcome::Stored { .. } => {
                    assert!(file.file_size() <= max + tolerance);
                    assert!(file.file_size() - before <= block_size(4) + len as u64);
                }
                SaveOutcome::NeedToFlush => {
                    assert_eq!(file.file_size(), before);
                    file.flush().unwrap();
                }
                SaveOutcome::AlreadyPresent => unreachable!(),
            }
            if rng.random_bool(0.3) {
                let first = file.keys().next();
                if let Some(k) = first {
                    file.load(&k).unwrap();
                }
            }
        }

        let disk = fs::metadata(file.path()).unwrap().len();
        assert_eq!(disk, file.file_size());
    }
}
