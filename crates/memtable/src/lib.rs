//! # Memtable
//!
//! In-memory write buffer of the storage engine.
//!
//! A [`MemTableManager`] rotates over N *generations*, each backed by an
//! [`OrderedContainer`]. Writes always land in the active generation. When it
//! fills up, the manager advances round-robin; if the generation it advances
//! into is still full from an earlier round, that generation is handed out as
//! a sorted [`FlushBatch`]. It stays sealed and readable until the caller
//! [`release`](MemTableManager::release)s it after the batch is on disk, and
//! only then becomes the new active one. Until then writes keep landing in
//! the current generation and every further write offers the batch again.
//!
//! Each generation also counts the WAL bytes that produced its entries. The
//! counter travels with the batch so the caller can trim exactly that many
//! bytes from the front of the log once the batch is on disk.

mod containers;

pub use containers::{BTreeContainer, HashContainer, OrderedContainer, SkipListContainer};

use config::{MemtableConfig, StructureType};
use std::collections::BTreeMap;
use tracing::debug;

/// One buffered mutation.
///
/// `tombstone == true` marks a delete; its `value` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemTableEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub tombstone: bool,
    /// Seconds since the Unix epoch, copied from the WAL entry.
    pub timestamp: u64,
}

impl MemTableEntry {
    pub fn put(key: Vec<u8>, value: Vec<u8>, timestamp: u64) -> Self {
        Self {
            key,
            value,
            tombstone: false,
            timestamp,
        }
    }

    pub fn tombstone(key: Vec<u8>, timestamp: u64) -> Self {
        Self {
            key,
            value: Vec::new(),
            tombstone: true,
            timestamp,
        }
    }
}

/// A sealed generation, ready to be written as a sorted run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushBatch {
    /// Generation the entries were taken from.
    pub generation: usize,
    /// Ascending by key, one entry per key.
    pub entries: Vec<MemTableEntry>,
    /// WAL bytes that may be discarded once `entries` are durable.
    pub wal_bytes: u64,
}

/// Builds an empty container of the configured kind.
pub fn new_container(structure: StructureType, capacity: usize) -> Box<dyn OrderedContainer> {
    match structure {
        StructureType::HashMap => Box::new(HashContainer::new(capacity)),
        StructureType::SkipList => Box::new(SkipListContainer::new(capacity)),
        StructureType::BTree => Box::new(BTreeContainer::new(capacity)),
    }
}

/// Round-robin set of memtable generations.
#[derive(Debug)]
pub struct MemTableManager {
    generations: Vec<Box<dyn OrderedContainer>>,
    wal_bytes: Vec<u64>,
    active: usize,
}

impl MemTableManager {
    /// `generations` is clamped to at least one.
    pub fn new(structure: StructureType, generations: usize, capacity: usize) -> Self {
        let n = generations.max(1);
        Self {
            generations: (0..n).map(|_| new_container(structure, capacity)).collect(),
            wal_bytes: vec![0; n],
            active: 0,
        }
    }

    pub fn from_config(cfg: &MemtableConfig) -> Self {
        Self::new(cfg.structure, cfg.generations, cfg.capacity)
    }

    /// Buffers `entry`, which occupied `wal_bytes` bytes of the log.
    ///
    /// Returns the oldest generation when the rotation hit one that was
    /// already full. Its entries and WAL bytes stay buffered until
    /// [`release`](Self::release) is called with the batch.
    pub fn add(&mut self, entry: MemTableEntry, wal_bytes: u64) -> Option<FlushBatch> {
        self.generations[self.active].add(entry);
        self.wal_bytes[self.active] += wal_bytes;

        if !self.generations[self.active].is_full() {
            return None;
        }

        let next = (self.active + 1) % self.generations.len();
        if !self.generations[next].is_full() {
            debug!(from = self.active, to = next, "memtable generation sealed");
            self.active = next;
            return None;
        }

        let entries = self.generations[next].sort();
        let wal_bytes = self.wal_bytes[next];
        debug!(
            generation = next,
            entries = entries.len(),
            wal_bytes,
            "memtable generation ready to flush"
        );
        Some(FlushBatch {
            generation: next,
            entries,
            wal_bytes,
        })
    }

    /// Empties the generation `batch` was taken from once its entries are
    /// durable, and makes it the active one.
    pub fn release(&mut self, batch: &FlushBatch) {
        let g = batch.generation;
        if g >= self.generations.len() {
            return;
        }
        self.generations[g].reset();
        self.wal_bytes[g] = 0;
        self.active = g;
        debug!(generation = g, wal_bytes = batch.wal_bytes, "memtable generation drained");
    }

    /// Buffers a tombstone for `key`. Deletes share the write path of [`add`](Self::add).
    pub fn delete(&mut self, key: Vec<u8>, timestamp: u64, wal_bytes: u64) -> Option<FlushBatch> {
        self.add(MemTableEntry::tombstone(key, timestamp), wal_bytes)
    }

    /// Most recent buffered entry for `key`, tombstones included.
    ///
    /// Generations are visited from the active one backwards, so the first
    /// hit is the newest without comparing timestamps.
    pub fn find(&self, key: &[u8]) -> Option<MemTableEntry> {
        let n = self.generations.len();
        (0..n)
            .map(|back| (self.active + n - back) % n)
            .find_map(|g| self.generations[g].find(key))
    }

    /// All buffered entries merged across generations, ascending by key.
    /// When a key appears in several generations the newest one wins.
    pub fn sort(&self) -> Vec<MemTableEntry> {
        let n = self.generations.len();
        let mut merged: BTreeMap<Vec<u8>, MemTableEntry> = BTreeMap::new();
        // Oldest generation first so newer inserts overwrite.
        for step in 1..=n {
            let g = (self.active + step) % n;
            for e in self.generations[g].sort() {
                merged.insert(e.key.clone(), e);
            }
        }
        merged.into_values().collect()
    }

    /// Empties every generation and zeroes the WAL counters.
    pub fn reset(&mut self) {
        for g in &mut self.generations {
            g.reset();
        }
        self.wal_bytes.iter_mut().for_each(|b| *b = 0);
        self.active = 0;
    }

    /// WAL bytes backing everything currently buffered.
    pub fn pending_wal_bytes(&self) -> u64 {
        self.wal_bytes.iter().sum()
    }

    /// Entries buffered across all generations (a key may count twice).
    pub fn len(&self) -> usize {
        self.generations.iter().map(|g| g.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_generation(&self) -> usize {
        self.active
    }

    pub fn generation_count(&self) -> usize {
        self.generations.len()
    }
}
