//! LRU cache of recently read values.
//!
//! Keyed by user key, capacity counted in entries. A capacity of 0 turns
//! every operation into a no-op. Compaction never changes what a key reads
//! as, so only writes and deletes touch the cache.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

pub struct ReadCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Default)]
struct CacheInner {
    map: HashMap<Vec<u8>, Vec<u8>>,
    /// Most recently used at the front.
    order: VecDeque<Vec<u8>>,
}

impl ReadCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached value of `key`. Promotes the entry to MRU on hit.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        if self.capacity == 0 {
            return None;
        }
        let mut inner = self.inner.lock();
        match inner.map.get(key).cloned() {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                promote(&mut inner.order, key);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts or replaces `key`, evicting the least recently used entry
    /// when full.
    pub fn insert(&self, key: &[u8], value: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.map.contains_key(key) {
            promote(&mut inner.order, key);
        } else {
            while inner.map.len() >= self.capacity {
                let Some(victim) = inner.order.pop_back() else {
                    break;
                };
                inner.map.remove(&victim);
            }
            inner.order.push_front(key.to_vec());
        }
        inner.map.insert(key.to_vec(), value.to_vec());
    }

    pub fn remove(&self, key: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.map.remove(key).is_some() {
            if let Some(pos) = inner.order.iter().position(|k| k == key) {
                inner.order.remove(pos);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ReadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

/// Moves `key` to the MRU position.
fn promote(order: &mut VecDeque<Vec<u8>>, key: &[u8]) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        if let Some(k) = order.remove(pos) {
            order.push_front(k);
        }
    }
}
