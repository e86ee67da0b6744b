mod merge_tests;
mod reader_tests;
mod scan_tests;
mod writer_tests;

use crate::*;
use memtable::MemTableEntry;
use std::path::Path;

// -------------------- Shared helpers --------------------

pub(crate) fn put(key: &str, value: &str, ts: u64) -> MemTableEntry {
    MemTableEntry::put(key.as_bytes().to_vec(), value.as_bytes().to_vec(), ts)
}

pub(crate) fn del(key: &str, ts: u64) -> MemTableEntry {
    MemTableEntry::tombstone(key.as_bytes().to_vec(), ts)
}

pub(crate) fn writer(dir: &Path, block_size: usize) -> SSTableWriter {
    SSTableWriter::new(
        dir,
        WriterOptions {
            block_size,
            bloom_false_positive_rate: 0.01,
        },
    )
}

/// Flushes `entries` at level 1 and opens the result.
pub(crate) fn flush_and_open(
    dir: &Path,
    block_size: usize,
    entries: &[MemTableEntry],
) -> anyhow::Result<(TableHandle, SSTableReader)> {
    let handle = writer(dir, block_size).flush(entries, 1)?;
    let reader = SSTableReader::open(&handle.path)?;
    Ok((handle, reader))
}

/// `key000`, `key001`, ... with values `val<i>`.
pub(crate) fn numbered(n: usize, ts: u64) -> Vec<MemTableEntry> {
    (0..n)
        .map(|i| put(&format!("key{:03}", i), &format!("val{}", i), ts))
        .collect()
}

pub(crate) fn keys_of(entries: &[MemTableEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| String::from_utf8_lossy(&e.key).into_owned())
        .collect()
}
