
use crate::*;
use std::collections::BTreeMap;
use std::path::Path;

// -------------------- Shared helpers --------------------

pub(crate) fn small_options(max_segment_entries: u64, max_segment_bytes: u64) -> WalOptions {
    WalOptions {
        max_segment_entries,
        max_segment_bytes,
        sync: false,
    }
}

pub(crate) fn concat_segments(wal: &Wal) -> Vec<u8> {
    let mut out = Vec::new();
    for p in wal.segment_paths().unwrap() {
        out.extend(std::fs::read(p).unwrap());
    }
    out
}

pub(crate) fn segment_len(dir: &Path, index: u64) -> u64 {
    std::fs::metadata(dir.join(segment_file_name(index)))
        .map(|m| m.len())
        .unwrap_or(0)
}

/// Applies replayed entries to an ordered map. When `flush_every` is set,
/// every N-th entry moves the in-memory state to `flushed` and reports the
/// bytes absorbed since the previous flush, like a memtable rotation would.
#[derive(Default)]
pub(crate) struct ModelSink {
    pub memory: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    pub flushed: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    pub seen: Vec<WalEntry>,
    pub flush_every: Option<usize>,
    pending_bytes: u64,
    since_flush: usize,
}

impl ModelSink {
    pub fn flushing(every: usize) -> Self {
        Self {
            flush_every: Some(every),
            ..Self::default()
        }
    }

    /// Live view: memory shadows flushed data.
    pub fn live(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        let mut merged = self.flushed.clone();
        for (k, v) in &self.memory {
            merged.insert(k.clone(), v.clone());
        }
        merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect()
    }
}

impl ReplaySink for ModelSink {
    fn absorb(
        &mut self,
        entry: WalEntry,
        encoded_len: u64,
    ) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
        self.seen.push(entry.clone());
        let tombstone = entry.is_tombstone();
        let (key, value) = entry.into_parts();
        self.memory.insert(key, if tombstone { None } else { Some(value) });
        self.pending_bytes += encoded_len;
        self.since_flush += 1;

        match self.flush_every {
            Some(n) if self.since_flush == n => {
                let memory = std::mem::take(&mut self.memory);
                self.flushed.extend(memory);
                self.since_flush = 0;
                Ok(std::mem::take(&mut self.pending_bytes))
            }
            _ => Ok(0),
        }
    }
}

/// Applies the same mutations directly, without the log.
pub(crate) fn apply_directly(ops: &[(Vec<u8>, Option<Vec<u8>>)]) -> BTreeMap<Vec<u8>, Vec<u8>> {
    let mut state = BTreeMap::new();
    for (k, v) in ops {
        match v {
            Some(v) => {
                state.insert(k.clone(), v.clone());
            }
            None => {
                state.remove(k);
            }
        }
    }
    state
}
