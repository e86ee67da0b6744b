//! K-way merge of sorted entry sources.
//!
//! Used for prefix and range scans that span several tables (and the
//! memtable). Each source is a key-ascending cursor; sources are ranked by
//! recency, index 0 being the newest. For every key the merged stream yields
//! one winner: the record with the largest timestamp, ties going to the
//! newer source.

use anyhow::Result;
use memtable::MemTableEntry;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::{Query, SSTableReader};

/// A key-ascending cursor.
pub type EntrySource<'a> = Box<dyn Iterator<Item = Result<MemTableEntry>> + 'a>;

/// Head of one source, ordered for the max-heap so that the smallest key
/// pops first, then the newest record.
struct Head {
    entry: MemTableEntry,
    source: usize,
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .entry
            .key
            .cmp(&self.entry.key)
            .then_with(|| self.entry.timestamp.cmp(&other.entry.timestamp))
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Newest-wins merge over many sources. Yields tombstoned winners too;
/// see [`MergedScan::live`].
pub struct MergedScan<'a> {
    sources: Vec<EntrySource<'a>>,
    heap: BinaryHeap<Head>,
}

impl<'a> MergedScan<'a> {
    /// `sources[0]` is the most recent.
    pub fn new(mut sources: Vec<EntrySource<'a>>) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (i, src) in sources.iter_mut().enumerate() {
            if let Some(entry) = src.next().transpose()? {
                heap.push(Head { entry, source: i });
            }
        }
        Ok(Self { sources, heap })
    }

    fn advance(&mut self, source: usize) -> Result<()> {
        if let Some(entry) = self.sources[source].next().transpose()? {
            self.heap.push(Head { entry, source });
        }
        Ok(())
    }

    /// Winners that are not tombstones.
    pub fn live(self) -> impl Iterator<Item = Result<MemTableEntry>> + 'a {
        self.filter(|r| !matches!(r, Ok(e) if e.tombstone))
    }
}

impl Iterator for MergedScan<'_> {
    type Item = Result<MemTableEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let top = self.heap.pop()?;
        if let Err(e) = self.advance(top.source) {
            return Some(Err(e));
        }
        // Older copies of the same key lose.
        while self.heap.peek().is_some_and(|h| h.entry.key == top.entry.key) {
            if let Some(dup) = self.heap.pop() {
                if let Err(e) = self.advance(dup.source) {
                    return Some(Err(e));
                }
            }
        }
        Some(Ok(top.entry))
    }
}

/// The `page`-th window of `page_size` items (pages start at 1; page 0 is
/// treated as 1).
pub fn paginate<T, I>(items: I, page: usize, page_size: usize) -> Result<Vec<T>>
where
    I: Iterator<Item = Result<T>>,
{
    let skip = page.max(1).saturating_sub(1).saturating_mul(page_size);
    let mut out = Vec::with_capacity(page_size.min(1024));
    for (i, item) in items.enumerate() {
        if out.len() == page_size {
            break;
        }
        // Errors surface even inside the skipped window.
        let item = item?;
        if i >= skip {
            out.push(item);
        }
    }
    Ok(out)
}

/// Keys starting with `prefix` across `readers` (newest first), merged and
/// paged. Keys whose newest record is a tombstone are left out.
pub fn multi_file_prefix_scan(
    readers: &[SSTableReader],
    prefix: &[u8],
    page: usize,
    page_size: usize,
) -> Result<Vec<Vec<u8>>> {
    let sources = readers
        .iter()
        .map(|r| Ok(Box::new(r.scan_iter(Query::Prefix(prefix))?) as EntrySource<'_>))
        .collect::<Result<Vec<_>>>()?;
    let keys = MergedScan::new(sources)?.live().map(|r| r.map(|e| e.key));
    paginate(keys, page, page_size)
}
