//! Cold-start path: WAL replay and leftover cleanup.
//!
//! Replay feeds every logged entry through the same memtable path as a live
//! write. A generation that fills up during replay is flushed on the spot,
//! and the WAL bytes it covered are trimmed once replay ends.
use memtable::MemTableManager;
use std::error::Error;
use std::path::Path;
use tracing::{info, warn};
use wal::{ReplaySink, WalEntry};

use crate::tables::TableSet;
use crate::write::{absorb_entry, to_memtable_entry};
use crate::Engine;

/// Routes replayed entries into the memtable manager.
struct RecoverySink<'a> {
    mem: &'a mut MemTableManager,
    tables: &'a mut TableSet,
    flushes: u64,
}

impl ReplaySink for RecoverySink<'_> {
    fn absorb(
        &mut self,
        entry: WalEntry,
        encoded_len: u64,
    ) -> Result<u64, Box<dyn Error + Send + Sync>> {
        let trimmed = absorb_entry(self.mem, self.tables, to_memtable_entry(entry), encoded_len)?;
        if trimmed > 0 {
            self.flushes += 1;
        }
        Ok(trimmed)
    }
}

impl Engine {
    /// Replays the WAL into the (empty) memtable.
    pub(crate) fn recover(&mut self) -> anyhow::Result<()> {
        let mut sink = RecoverySink {
            mem: &mut self.mem,
            tables: &mut self.tables,
            flushes: 0,
        };
        let report = self.wal.recover(&mut sink)?;
        let flushed = sink.flushes;
        self.flushes += flushed;

        if report.stopped_at_corruption {
            warn!(
                discarded = report.discarded_tail_bytes,
                "WAL replay stopped at a corrupt entry"
            );
        }
        info!(
            entries = report.entries,
            flushed,
            buffered = self.mem.len(),
            "engine recovered"
        );
        Ok(())
    }
}

/// Removes `*.tmp` leftovers of interrupted table, artifact and manifest
/// writes.
pub(crate) fn cleanup_tmp_files(sst_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(sst_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let p = entry.path();
        let is_tmp = p
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".tmp"));
        if is_tmp {
            match std::fs::remove_file(&p) {
                Ok(()) => info!(path = %p.display(), "removed leftover tmp file"),
                Err(e) => warn!(path = %p.display(), error = %e, "could not remove tmp file"),
            }
        }
    }
}
