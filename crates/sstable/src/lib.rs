//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk storage files for the storage engine.
//!
//! When a memtable generation is drained, the engine flushes its sorted
//! entries to disk as an SSTable. SSTables are *write-once, read-many*: once
//! published they are never modified, only replaced during compaction.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ HEADER (32 bytes)                                             │
//! │ f0 = data_size+32 | f1 = index_size+32 | f2 = bloom_start     │
//! │ f3 = bloom bit-array length                                   │
//! ├───────────────────────────────────────────────────────────────┤
//! │ DATA ZONE (sorted records)                                    │
//! │ key_size (u64) | value_size (u64) | timestamp (u64)           │
//! │ tombstone (u8) | key | value                                  │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX ZONE (every block_size-th data record)                  │
//! │ key_len (u64) | key | data_offset (u64)                       │
//! ├───────────────────────────────────────────────────────────────┤
//! │ SUMMARY ZONE (every block_size-th index record)               │
//! │ key_len (u64) | key | index_offset (u64)                      │
//! ├───────────────────────────────────────────────────────────────┤
//! │ BLOOM ZONE                                                    │
//! │ M (u64) | ceil(M/8) bytes | (seed_len (u64) | seed)* to EOF   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Records carry no checksum: integrity is
//! covered by the Merkle artifact `merkle_<ts>.txt` written beside each table
//! (see [`SSTableReader::verify_integrity`]).
//!
//! ## Naming
//!
//! Tables are named `file_<unix_nanos>_<level>.db`. The timestamp orders
//! tables by creation; a larger timestamp is newer.

mod format;
mod merge;
mod reader;
mod scan;
mod writer;

pub use format::{
    read_pointer, read_record, record_len, write_pointer, write_record, Header, HEADER_SIZE,
    MAX_KEY_BYTES, MAX_VALUE_BYTES, RECORD_HEADER_SIZE,
};
pub use merge::{merge_runs, merge_tables, TwoWayMerge};
pub use reader::{DataIter, Query, SSTableReader, ScanIter};
pub use scan::{multi_file_prefix_scan, paginate, EntrySource, MergedScan};
pub use writer::{SSTableWriter, WriterOptions};

use std::io;
use std::path::{Path, PathBuf};

/// `file_<timestamp>_<level>.db`
#[must_use]
pub fn table_file_name(timestamp: u128, level: u32) -> String {
    format!("file_{}_{}.db", timestamp, level)
}

/// Parses `file_<timestamp>_<level>.db`.
pub fn parse_table_file_name(name: &str) -> Option<(u128, u32)> {
    let stem = name.strip_prefix("file_")?.strip_suffix(".db")?;
    let (ts, level) = stem.split_once('_')?;
    Some((ts.parse().ok()?, level.parse().ok()?))
}

/// A published table on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableHandle {
    pub path: PathBuf,
    /// Creation time in Unix nanoseconds; larger is newer.
    pub timestamp: u128,
    pub level: u32,
}

impl TableHandle {
    pub fn new(dir: &Path, timestamp: u128, level: u32) -> Self {
        Self {
            path: dir.join(table_file_name(timestamp, level)),
            timestamp,
            level,
        }
    }

    /// Handle for an existing file, if its name follows the table scheme.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let path = path.as_ref();
        let (timestamp, level) = parse_table_file_name(path.file_name()?.to_str()?)?;
        Some(Self {
            path: path.to_path_buf(),
            timestamp,
            level,
        })
    }

    pub fn file_name(&self) -> String {
        table_file_name(self.timestamp, self.level)
    }

    fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Path of the companion Merkle artifact.
    pub fn merkle_path(&self) -> PathBuf {
        self.dir().join(merkle::artifact_name(self.timestamp))
    }

    /// Moves the table to `level` by renaming it. The Merkle artifact is
    /// keyed by timestamp only and stays where it is.
    pub fn promote(&self, level: u32) -> io::Result<TableHandle> {
        let target = TableHandle::new(self.dir(), self.timestamp, level);
        std::fs::rename(&self.path, &target.path)?;
        Ok(target)
    }

    /// Deletes the table and its Merkle artifact.
    pub fn remove(&self) -> io::Result<()> {
        std::fs::remove_file(&self.path)?;
        match std::fs::remove_file(self.merkle_path()) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests;
