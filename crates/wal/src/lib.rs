//! # WAL - Write-Ahead Log
//!
//! Crash-safe durability for the storage engine.
//!
//! Every mutation (put or delete) is serialized into a binary entry and
//! appended to the WAL **before** the corresponding memtable update. On
//! restart the WAL is replayed into the memtable manager, guaranteeing that
//! no acknowledged write is lost.
//!
//! ## Entry format
//!
//! ```text
//! [crc: u32][timestamp: u64][tombstone: u8][key_size: u64][value_size: u64][key][value]
//! ```
//!
//! All integers are little-endian. The CRC32 is computed over the whole
//! serialized entry with the CRC field set to zero.
//!
//! ## Segments
//!
//! The log is a sequence of files `wal.0.0.<N>.log` numbered densely from 0.
//! A segment holds at most `max_segment_bytes` bytes and at most
//! `max_segment_entries` entries that *start* in it. When an entry does not
//! fit into the remaining capacity it is split: the head fills the current
//! segment and the tail continues in the next one. Recovery therefore reads
//! the segments as one continuous byte stream.
//!
//! ## Trimming
//!
//! Once a memtable generation is flushed, the WAL bytes that produced it are
//! no longer needed. [`Wal::delete_consumed_bytes`] drops them from the front
//! of the stream: whole segments are deleted, the rest are renumbered, and a
//! partially consumed first segment is recorded in the `remaining_bytes`
//! skip marker rather than rewritten.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{Wal, WalOptions};
//!
//! let mut wal = Wal::open("logs", WalOptions::default()).unwrap();
//! let entry = wal.append(b"hello", b"world", false).unwrap();
//! println!("written at {}", entry.timestamp());
//! ```

mod entry;
mod segments;
mod recovery;

pub use entry::{WalEntry, HEADER_SIZE};
pub use segments::{segment_file_name, Wal, WalOptions, SEGMENT_PREFIX, SKIP_MARKER};
pub use recovery::{RecoveryReport, ReplaySink};

use std::io;
use thiserror::Error;

/// Largest key accepted by the log (64 KiB).
pub const MAX_KEY_BYTES: usize = 64 * 1024;
/// Largest value accepted by the log (10 MiB).
pub const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// An entry header holds impossible values.
    #[error("corrupt entry: {0}")]
    Corrupt(String),

    /// A key or value exceeds the size caps.
    #[error("entry too large: {0}")]
    TooLarge(String),

    /// The skip marker is unreadable or points past the first segment.
    #[error("invalid skip marker: {0}")]
    Marker(String),

    /// The recovery sink rejected an entry.
    #[error("recovery sink failed: {0}")]
    Sink(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(test)]
mod tests;
