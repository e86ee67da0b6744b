//! Backing structures for a single memtable generation.

use crossbeam_skiplist::SkipMap;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::MemTableEntry;

/// Capacity-bounded key → entry map of one generation.
///
/// A later `add` for the same key replaces the earlier entry: arrival order
/// is recency within a generation.
pub trait OrderedContainer: fmt::Debug + Send + Sync {
    fn add(&mut self, entry: MemTableEntry);

    fn find(&self, key: &[u8]) -> Option<MemTableEntry>;

    /// Marks `key` deleted at `timestamp`, inserting a tombstone if absent.
    fn delete(&mut self, key: &[u8], timestamp: u64);

    /// Distinct keys held.
    fn len(&self) -> usize;

    fn capacity(&self) -> usize;

    fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every entry, ascending by key.
    fn sort(&self) -> Vec<MemTableEntry>;

    fn reset(&mut self);
}

fn mark_deleted(entry: &mut MemTableEntry, timestamp: u64) {
    entry.tombstone = true;
    entry.value.clear();
    entry.timestamp = timestamp;
}

// -------------------- HashMap --------------------

/// Unordered map; sorting happens on drain.
#[derive(Debug, Default)]
pub struct HashContainer {
    map: HashMap<Vec<u8>, MemTableEntry>,
    capacity: usize,
}

impl HashContainer {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            capacity,
        }
    }
}

impl OrderedContainer for HashContainer {
    fn add(&mut self, entry: MemTableEntry) {
        self.map.insert(entry.key.clone(), entry);
    }

    fn find(&self, key: &[u8]) -> Option<MemTableEntry> {
        self.map.get(key).cloned()
    }

    fn delete(&mut self, key: &[u8], timestamp: u64) {
        match self.map.get_mut(key) {
            Some(e) => mark_deleted(e, timestamp),
            None => self.add(MemTableEntry::tombstone(key.to_vec(), timestamp)),
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn sort(&self) -> Vec<MemTableEntry> {
        let mut entries: Vec<MemTableEntry> = self.map.values().cloned().collect();
        entries.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    fn reset(&mut self) {
        self.map.clear();
    }
}

// -------------------- Skip list --------------------

/// Lock-free skip list from `crossbeam-skiplist`.
pub struct SkipListContainer {
    map: SkipMap<Vec<u8>, MemTableEntry>,
    capacity: usize,
}

impl fmt::Debug for SkipListContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkipListContainer")
            .field("len", &self.map.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl SkipListContainer {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: SkipMap::new(),
            capacity,
        }
    }
}

impl OrderedContainer for SkipListContainer {
    fn add(&mut self, entry: MemTableEntry) {
        self.map.insert(entry.key.clone(), entry);
    }

    fn find(&self, key: &[u8]) -> Option<MemTableEntry> {
        self.map.get(key).map(|e| e.value().clone())
    }

    fn delete(&mut self, key: &[u8], timestamp: u64) {
        let mut entry = self
            .find(key)
            .unwrap_or_else(|| MemTableEntry::tombstone(key.to_vec(), timestamp));
        mark_deleted(&mut entry, timestamp);
        self.add(entry);
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn sort(&self) -> Vec<MemTableEntry> {
        self.map.iter().map(|e| e.value().clone()).collect()
    }

    fn reset(&mut self) {
        self.map = SkipMap::new();
    }
}

// -------------------- B-tree --------------------

#[derive(Debug, Default)]
pub struct BTreeContainer {
    map: BTreeMap<Vec<u8>, MemTableEntry>,
    capacity: usize,
}

impl BTreeContainer {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: BTreeMap::new(),
            capacity,
        }
    }
}

impl OrderedContainer for BTreeContainer {
    fn add(&mut self, entry: MemTableEntry) {
        self.map.insert(entry.key.clone(), entry);
    }

    fn find(&self, key: &[u8]) -> Option<MemTableEntry> {
        self.map.get(key).cloned()
    }

    fn delete(&mut self, key: &[u8], timestamp: u64) {
        match self.map.get_mut(key) {
            Some(e) => mark_deleted(e, timestamp),
            None => self.add(MemTableEntry::tombstone(key.to_vec(), timestamp)),
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn sort(&self) -> Vec<MemTableEntry> {
        self.map.values().cloned().collect()
    }

    fn reset(&mut self) {
        self.map.clear();
    }
}
