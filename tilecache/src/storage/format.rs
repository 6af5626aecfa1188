//! On-disk layout of a storage file.
//!
//! ```text
//! ┌──────────────────────────────┐ 0
//! │ FileHeader (22 bytes)        │
//! ├──────────────────────────────┤ HEADER_SIZE
//! │ BlockHeader {count, next}    │
//! │ KeyRecord × block_capacity   │
//! ├──────────────────────────────┤
//! │ payload bytes ...            │
//! ├──────────────────────────────┤ next
//! │ BlockHeader {count, next}    │
//! │ KeyRecord × block_capacity   │
//! ├──────────────────────────────┤
//! │ payload bytes ...            │
//! └──────────────────────────────┘
//! ```
//!
//! All integers are little-endian and written field by field, so the layout
//! never depends on struct padding.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::key::TileKey;

/// Magic number at the start of every storage file ("TLCF").
pub const SIGNATURE: u32 = 0x544C_4346;

/// Current format version. Files with any other version are regenerated.
pub const FORMAT_VERSION: u8 = 1;

/// Number of key records per block.
pub const DEFAULT_BLOCK_CAPACITY: u32 = 100;

/// Serialized size of [`FileHeader`].
pub const HEADER_SIZE: u64 = 4 + 1 + 1 + 4 + 4 + 4 + 4;

/// Byte offset of the corruption flag inside the header.
pub const CORRUPTION_FLAG_OFFSET: u64 = 5;

/// Byte offset of the block count inside the header.
pub const BLOCK_COUNT_OFFSET: u64 = 18;

/// Serialized size of [`BlockHeader`].
pub const BLOCK_HEADER_SIZE: u64 = 4 + 4;

/// Serialized size of [`KeyRecord`].
pub const RECORD_SIZE: u64 = 8 + 4 + 4 + 4;

/// Offset of the usage counter inside a key record.
pub const RECORD_COUNTER_OFFSET: u64 = 16;

/// Total size of a block's fixed part for the given capacity.
#[inline]
pub fn block_size(capacity: u32) -> u64 {
    BLOCK_HEADER_SIZE + capacity as u64 * RECORD_SIZE
}

/// Offset of record `index` within the block starting at `block_offset`.
#[inline]
pub fn record_offset(block_offset: u64, index: u32) -> u64 {
    block_offset + BLOCK_HEADER_SIZE + index as u64 * RECORD_SIZE
}

/// File header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub signature: u32,
    pub version: u8,
    pub corrupted: bool,
    pub max_size: i32,
    pub provider_hash: u32,
    pub block_capacity: u32,
    pub block_count: u32,
}

impl FileHeader {
    /// Header for a freshly created, empty file.
    pub fn new(max_size: i32, provider_hash: u32, block_capacity: u32) -> Self {
        Self {
            signature: SIGNATURE,
            version: FORMAT_VERSION,
            corrupted: false,
            max_size,
            provider_hash,
            block_capacity,
            block_count: 0,
        }
    }

    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            signature: reader.read_u32::<LittleEndian>()?,
            version: reader.read_u8()?,
            corrupted: reader.read_u8()? != 0,
            max_size: reader.read_i32::<LittleEndian>()?,
            provider_hash: reader.read_u32::<LittleEndian>()?,
            block_capacity: reader.read_u32::<LittleEndian>()?,
            block_count: reader.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.signature)?;
        writer.write_u8(self.version)?;
        writer.write_u8(self.corrupted as u8)?;
        writer.write_i32::<LittleEndian>(self.max_size)?;
        writer.write_u32::<LittleEndian>(self.provider_hash)?;
        writer.write_u32::<LittleEndian>(self.block_capacity)?;
        writer.write_u32::<LittleEndian>(self.block_count)?;
        Ok(())
    }
}

/// Fixed header in front of each block's record array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHeader {
    /// Number of populated records.
    pub count: u32,
    /// Offset of the next block, 0 when this is the last one.
    pub next: i32,
}

impl BlockHeader {
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            count: reader.read_u32::<LittleEndian>()?,
            next: reader.read_i32::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.count)?;
        writer.write_i32::<LittleEndian>(self.next)?;
        Ok(())
    }
}

/// Location, size and usage of a stored payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredEntry {
    pub offset: i32,
    pub size: u32,
    pub counter: u32,
}

/// One `(TileKey, StoredEntry)` pair as it appears inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRecord {
    /// Packed key; kept raw so unreadable records can be reported instead
    /// of failing the read.
    pub key: u64,
    pub entry: StoredEntry,
}

impl KeyRecord {
    pub fn new(key: TileKey, entry: StoredEntry) -> Self {
        Self {
            key: key.as_u64(),
            entry,
        }
    }

    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            key: reader.read_u64::<LittleEndian>()?,
            entry: StoredEntry {
                offset: reader.read_i32::<LittleEndian>()?,
                size: reader.read_u32::<LittleEndian>()?,
                counter: reader.read_u32::<LittleEndian>()?,
            },
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.key)?;
        writer.write_i32::<LittleEndian>(self.entry.offset)?;
        writer.write_u32::<LittleEndian>(self.entry.size)?;
        writer.write_u32::<LittleEndian>(self.entry.counter)?;
        Ok(())
    }
}
