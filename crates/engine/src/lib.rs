//! # Engine - LSM Storage Engine
//!
//! The orchestrator that ties the [`wal`], [`memtable`] and [`sstable`]
//! crates into a key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                   ENGINE                      │
//! │                                               │
//! │ write.rs → WAL append → MemTableManager.add   │
//! │              |                                │
//! │              |  (generation drained?)         │
//! │              |            yes                 │
//! │              v                                │
//! │     flush → level-1 table → WAL trim          │
//! │              |                                │
//! │              |  (level over its trigger?)     │
//! │              |            yes                 │
//! │              v                                │
//! │     compaction.rs → compact_pair, repeated    │
//! │                                               │
//! │ read.rs → memtable → cache → L1 → L2 → ...    │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                              |
//! |----------------|------------------------------------------------------|
//! | `lib.rs`       | `Engine` struct, `open`, accessors, `Debug`           |
//! | [`recovery`]   | WAL replay into the memtable, tmp file cleanup        |
//! | [`write`]      | `put()`, `delete()`, `force_flush()`, `shutdown()`    |
//! | [`read`]       | `get()`, `prefix_scan()`, `scan()`, `verify_tables()` |
//! | [`compaction`] | size-tiered and leveled policies over `compact_pair`  |
//! | [`manifest`]   | persistent level listing (atomic rewrite)             |
//! | [`cache`]      | LRU read cache                                        |
//!
//! ## Crash Safety
//!
//! Every mutation is appended to the WAL before the memtable sees it. WAL
//! bytes are trimmed only after the table holding them is published and
//! listed in the manifest. Compaction deletes its inputs only after the
//! merged table is listed. Tables and the manifest are written to temp
//! files and renamed into place.
pub mod cache;
mod compaction;
pub mod manifest;
mod read;
mod recovery;
mod tables;
mod write;

use anyhow::{Context, Result};
use config::Config;
use memtable::MemTableManager;
use sstable::{SSTableWriter, WriterOptions};
use std::path::Path;
use wal::{Wal, WalOptions};

pub use cache::ReadCache;
pub use config::CompactionAlgorithm;
pub use tables::LiveTable;

use tables::TableSet;

/// Confirmation of a logged write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAck {
    /// Seconds since the Unix epoch, as stored in the WAL entry.
    pub timestamp: u64,
}

/// Point-in-time counters, see [`Engine::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub memtable_entries: usize,
    pub active_generation: usize,
    pub pending_wal_bytes: u64,
    /// `tables_per_level[0]` is level 1.
    pub tables_per_level: Vec<usize>,
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub flushes: u64,
    pub compactions: u64,
}

/// The storage engine.
///
/// # Write Path
///
/// 1. Append the entry to the WAL; its timestamp becomes the record's.
/// 2. Add it to the active memtable generation.
/// 3. If the manager drained a full generation, write it as a level-1
///    table, list it in the manifest and trim that many WAL bytes.
/// 4. Run automatic compaction if a level reached its trigger.
///
/// # Read Path
///
/// 1. The memtable, newest generation first (tombstones included).
/// 2. The read cache.
/// 3. Tables, level 1 first and newest first within a level.
///
/// The first record found wins; a tombstone reads as absent.
pub struct Engine {
    pub(crate) config: Config,
    pub(crate) wal: Wal,
    pub(crate) mem: MemTableManager,
    pub(crate) tables: TableSet,
    pub(crate) cache: ReadCache,
    pub(crate) flushes: u64,
    pub(crate) compactions: u64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("data_dir", &self.config.data_dir)
            .field("memtable_entries", &self.mem.len())
            .field("active_generation", &self.mem.active_generation())
            .field("pending_wal_bytes", &self.mem.pending_wal_bytes())
            .field("tables_per_level", &self.tables.counts())
            .field("compaction", &self.config.compaction.algorithm)
            .field("flushes", &self.flushes)
            .field("compactions", &self.compactions)
            .field("cache", &self.cache)
            .finish()
    }
}

impl Engine {
    /// Opens (or creates) the store rooted at `config.data_dir`.
    ///
    /// # Recovery Steps
    ///
    /// 1. Validate the config and create the WAL and SSTable directories.
    /// 2. Remove `*.tmp` leftovers from interrupted writes.
    /// 3. Load the manifest (bootstrapping it from the directory if absent)
    ///    and open every listed table.
    /// 4. Replay the WAL through the normal memtable path; generations that
    ///    fill up are flushed and their WAL bytes trimmed.
    /// 5. Run automatic compaction.
    pub fn open(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let sst_dir = config.sstable_dir();
        std::fs::create_dir_all(&sst_dir)
            .with_context(|| format!("creating {}", sst_dir.display()))?;
        recovery::cleanup_tmp_files(&sst_dir);

        let writer = SSTableWriter::new(&sst_dir, WriterOptions::from(&config.sstable));
        let tables = TableSet::open(&sst_dir, writer, config.compaction.max_levels)?;

        let wal = Wal::open(
            config.wal_dir(),
            WalOptions {
                max_segment_entries: config.wal.max_segment_entries,
                max_segment_bytes: config.wal.max_segment_bytes,
                sync: config.wal.sync,
            },
        )
        .context("opening WAL")?;

        let mut engine = Self {
            mem: MemTableManager::from_config(&config.memtable),
            cache: ReadCache::new(config.cache.capacity),
            config,
            wal,
            tables,
            flushes: 0,
            compactions: 0,
        };
        engine.recover()?;
        engine.maybe_compact()?;
        Ok(engine)
    }

    /// Opens the store at `data_dir` with default settings.
    pub fn open_dir<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        Self::open(Config::with_data_dir(data_dir))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Total number of live tables.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Tables at `level` (from 1), newest first.
    #[must_use]
    pub fn tables_at(&self, level: u32) -> &[LiveTable] {
        self.tables.level(level)
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            memtable_entries: self.mem.len(),
            active_generation: self.mem.active_generation(),
            pending_wal_bytes: self.mem.pending_wal_bytes(),
            tables_per_level: self.tables.counts(),
            cache_entries: self.cache.len(),
            cache_hits: self.cache.hits(),
            cache_misses: self.cache.misses(),
            flushes: self.flushes,
            compactions: self.compactions,
        }
    }
}

#[cfg(test)]
mod tests;
