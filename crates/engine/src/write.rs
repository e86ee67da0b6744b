//! Write path: `put()`, `delete()`, `force_flush()` and `shutdown()`.
//!
//! Every mutation is logged before it is buffered. Replayed WAL entries take
//! the same route through [`absorb_entry`], so a replayed write fills and
//! flushes generations exactly as it did the first time.
use anyhow::{ensure, Result};
use memtable::{MemTableEntry, MemTableManager};
use tracing::debug;
use wal::WalEntry;

use crate::tables::TableSet;
use crate::{Engine, WriteAck};

/// Buffers one logged mutation that took `wal_bytes` bytes of the log.
///
/// If the manager hands back a full generation it is published as a
/// level-1 table and only then released. When publishing fails the
/// generation stays buffered and the next write retries it. Returns how many
/// WAL bytes a successful flush made safe to trim.
pub(crate) fn absorb_entry(
    mem: &mut MemTableManager,
    tables: &mut TableSet,
    entry: MemTableEntry,
    wal_bytes: u64,
) -> Result<u64> {
    let drained = if entry.tombstone {
        mem.delete(entry.key, entry.timestamp, wal_bytes)
    } else {
        mem.add(entry, wal_bytes)
    };
    match drained {
        Some(batch) => {
            tables.publish(&batch.entries, 1)?;
            mem.release(&batch);
            Ok(batch.wal_bytes)
        }
        None => Ok(0),
    }
}

/// Memtable record carried by a WAL entry.
pub(crate) fn to_memtable_entry(entry: WalEntry) -> MemTableEntry {
    let timestamp = entry.timestamp();
    let tombstone = entry.is_tombstone();
    let (key, value) = entry.into_parts();
    if tombstone {
        MemTableEntry::tombstone(key, timestamp)
    } else {
        MemTableEntry::put(key, value, timestamp)
    }
}

impl Engine {
    /// Stores `value` under `key`.
    ///
    /// The write is acknowledged only after the WAL append succeeded.
    ///
    /// # Errors
    ///
    /// Empty keys and keys or values over the WAL caps are rejected. Any
    /// I/O failure while logging, flushing or compacting is returned.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<WriteAck> {
        ensure!(!key.is_empty(), "key must not be empty");
        let logged = self.wal.append(key, value, false)?;
        self.cache.insert(key, value);
        self.apply(logged)
    }

    /// Deletes `key` by logging and buffering a tombstone.
    pub fn delete(&mut self, key: &[u8]) -> Result<WriteAck> {
        ensure!(!key.is_empty(), "key must not be empty");
        let logged = self.wal.append(key, &[], true)?;
        self.cache.remove(key);
        self.apply(logged)
    }

    fn apply(&mut self, logged: WalEntry) -> Result<WriteAck> {
        let ack = WriteAck {
            timestamp: logged.timestamp(),
        };
        let len = logged.encoded_len() as u64;
        let trim = absorb_entry(
            &mut self.mem,
            &mut self.tables,
            to_memtable_entry(logged),
            len,
        )?;
        if trim > 0 {
            self.flushes += 1;
            self.wal.delete_consumed_bytes(trim)?;
            debug!(trimmed = trim, "WAL trimmed after flush");
            self.maybe_compact()?;
        }
        Ok(ack)
    }

    /// Flushes every generation as one level-1 table and trims the WAL of
    /// everything they held.
    ///
    /// Returns `false` if the memtable was empty.
    pub fn force_flush(&mut self) -> Result<bool> {
        let entries = self.mem.sort();
        if entries.is_empty() {
            return Ok(false);
        }
        self.tables.publish(&entries, 1)?;
        let trim = self.mem.pending_wal_bytes();
        self.mem.reset();
        self.flushes += 1;
        self.wal.delete_consumed_bytes(trim)?;
        self.maybe_compact()?;
        Ok(true)
    }

    /// Flushes the memtable and syncs the WAL.
    ///
    /// Dropping an engine without calling this loses nothing: the WAL is
    /// replayed on the next [`Engine::open`].
    pub fn shutdown(mut self) -> Result<()> {
        self.force_flush()?;
        self.wal.sync_to_disk()?;
        Ok(())
    }
}
