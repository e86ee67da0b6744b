//! Two-way merge of sorted runs.
//!
//! The core primitive of compaction: walk two key-ascending inputs in step
//! and resolve equal keys by timestamp. Tombstones pass through unchanged so
//! a merged run can itself be merged again; dropping them is the caller's
//! decision.

use anyhow::Result;
use memtable::MemTableEntry;
use std::cmp::Ordering;
use std::convert::Infallible;
use std::iter::Fuse;
use tracing::info;

use crate::{SSTableReader, SSTableWriter, TableHandle};

/// Streaming merge of run `a` (newer) with run `b` (older).
///
/// Equal keys: the larger timestamp wins and both inputs advance. Equal
/// timestamps go to `a`. Errors from either input are passed through as
/// they occur.
pub struct TwoWayMerge<A: Iterator, B: Iterator> {
    a: Fuse<A>,
    b: Fuse<B>,
    head_a: Option<MemTableEntry>,
    head_b: Option<MemTableEntry>,
}

impl<A, B, E> TwoWayMerge<A, B>
where
    A: Iterator<Item = Result<MemTableEntry, E>>,
    B: Iterator<Item = Result<MemTableEntry, E>>,
{
    pub fn new(a: A, b: B) -> Self {
        Self {
            a: a.fuse(),
            b: b.fuse(),
            head_a: None,
            head_b: None,
        }
    }
}

impl<A, B, E> Iterator for TwoWayMerge<A, B>
where
    A: Iterator<Item = Result<MemTableEntry, E>>,
    B: Iterator<Item = Result<MemTableEntry, E>>,
{
    type Item = Result<MemTableEntry, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.head_a.is_none() {
            match self.a.next() {
                Some(Ok(e)) => self.head_a = Some(e),
                Some(Err(e)) => return Some(Err(e)),
                None => {}
            }
        }
        if self.head_b.is_none() {
            match self.b.next() {
                Some(Ok(e)) => self.head_b = Some(e),
                Some(Err(e)) => return Some(Err(e)),
                None => {}
            }
        }

        match (self.head_a.take(), self.head_b.take()) {
            (None, None) => None,
            (Some(x), None) | (None, Some(x)) => Some(Ok(x)),
            (Some(x), Some(y)) => match x.key.cmp(&y.key) {
                Ordering::Less => {
                    self.head_b = Some(y);
                    Some(Ok(x))
                }
                Ordering::Greater => {
                    self.head_a = Some(x);
                    Some(Ok(y))
                }
                Ordering::Equal => Some(Ok(if y.timestamp > x.timestamp { y } else { x })),
            },
        }
    }
}

/// Merges two in-memory runs, `a` being the newer one.
pub fn merge_runs(a: Vec<MemTableEntry>, b: Vec<MemTableEntry>) -> Vec<MemTableEntry> {
    TwoWayMerge::new(
        a.into_iter().map(Ok::<_, Infallible>),
        b.into_iter().map(Ok::<_, Infallible>),
    )
    .map(|r| match r {
        Ok(e) => e,
        Err(never) => match never {},
    })
    .collect()
}

/// Streams the data zones of `newer` and `older` through a [`TwoWayMerge`]
/// into a new table at `level`.
///
/// With `drop_tombstones` deleted keys are left out of the output. Returns
/// `None` when nothing survives. The inputs are not touched.
pub fn merge_tables(
    newer: &SSTableReader,
    older: &SSTableReader,
    writer: &SSTableWriter,
    level: u32,
    drop_tombstones: bool,
) -> Result<Option<TableHandle>> {
    info!(
        newer = %newer.path().display(),
        older = %older.path().display(),
        level,
        "merging sstables"
    );
    let merged = TwoWayMerge::new(newer.iter()?, older.iter()?)
        .filter(|r| !(drop_tombstones && matches!(r, Ok(e) if e.tombstone)));
    writer.write_stream(merged, level)
}
