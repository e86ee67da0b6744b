//! Streaming replay of the segment sequence.
//!
//! Segments are fed one after another into a [`StreamDecoder`], which holds
//! any undecodable tail until the next segment supplies the rest of the
//! entry. Decoding stops at the first entry whose CRC does not match; the
//! entries before it stay valid.

use std::error::Error;
use std::fs;
use tracing::{info, warn};

use crate::entry::WalEntry;
use crate::{Wal, WalError};

/// Receiver of replayed entries.
///
/// The engine implements this with its normal write path, so a replayed
/// entry may fill a memtable generation and trigger a flush exactly as a
/// live write would.
pub trait ReplaySink {
    /// Absorbs one entry that occupied `encoded_len` bytes of the log.
    ///
    /// Returns how many log bytes became safe to discard because of this
    /// entry (non-zero only when it caused a flush).
    fn absorb(
        &mut self,
        entry: WalEntry,
        encoded_len: u64,
    ) -> Result<u64, Box<dyn Error + Send + Sync>>;
}

/// Summary of one [`Wal::recover`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Segments read.
    pub segments: usize,
    /// Entries handed to the sink.
    pub entries: u64,
    /// Of those, how many were tombstones.
    pub tombstones: u64,
    /// Bytes trimmed from the front after replay.
    pub trimmed_bytes: u64,
    /// Bytes cut from the end (incomplete or corrupt tail).
    pub discarded_tail_bytes: u64,
    /// Replay stopped at a CRC mismatch or malformed header.
    pub stopped_at_corruption: bool,
}

/// Arena + cursor over the logical byte stream.
#[derive(Debug, Default)]
pub(crate) struct StreamDecoder {
    buf: Vec<u8>,
    pos: usize,
}

impl StreamDecoder {
    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete entry, or `None` while more bytes are needed.
    pub(crate) fn next_entry(&mut self) -> Result<Option<(WalEntry, usize)>, WalError> {
        match WalEntry::decode(&self.buf[self.pos..])? {
            Some((entry, len)) => {
                self.pos += len;
                Ok(Some((entry, len)))
            }
            None => Ok(None),
        }
    }

    /// Bytes buffered but not yet decoded.
    pub(crate) fn pending(&self) -> usize {
        self.buf.len() - self.pos
    }
}

impl Wal {
    /// Replays every segment into `sink`, then trims the bytes the sink
    /// reports as flushed.
    ///
    /// Tombstoned entries are passed through as deletes; the sink decides
    /// how to apply them. An incomplete final entry (crash mid-append) and
    /// anything after a corrupt entry are cut from the log so that later
    /// appends stay reachable. Running recovery again on the result yields
    /// the same state.
    ///
    /// # Errors
    ///
    /// [`WalError::Io`] on filesystem failure, [`WalError::Marker`] if the
    /// skip marker exceeds the first segment, [`WalError::Sink`] if the sink
    /// fails. Corruption is not an error: it ends replay and is reported in
    /// [`RecoveryReport::stopped_at_corruption`].
    pub fn recover<S: ReplaySink>(&mut self, sink: &mut S) -> Result<RecoveryReport, WalError> {
        let skip = self.skip_bytes()?;
        let segments = self.list_segments()?;

        let mut report = RecoveryReport {
            segments: segments.len(),
            ..RecoveryReport::default()
        };
        let mut decoder = StreamDecoder::default();
        let mut valid_end = 0u64;
        let mut safe_to_trim = 0u64;

        'segments: for (i, (_, path)) in segments.iter().enumerate() {
            let bytes = fs::read(path)?;
            let start = if i == 0 {
                if skip > bytes.len() as u64 {
                    return Err(WalError::Marker(format!(
                        "skip of {} bytes exceeds first segment ({} bytes)",
                        skip,
                        bytes.len()
                    )));
                }
                skip as usize
            } else {
                0
            };
            decoder.feed(&bytes[start..]);

            loop {
                match decoder.next_entry() {
                    Ok(Some((entry, len))) => {
                        if !entry.validate() {
                            warn!(offset = valid_end, "WAL CRC mismatch, stopping replay");
                            report.stopped_at_corruption = true;
                            break 'segments;
                        }
                        report.entries += 1;
                        if entry.is_tombstone() {
                            report.tombstones += 1;
                        }
                        safe_to_trim += sink.absorb(entry, len as u64).map_err(WalError::Sink)?;
                        valid_end += len as u64;
                    }
                    Ok(None) => break,
                    Err(WalError::Corrupt(reason)) => {
                        warn!(offset = valid_end, %reason, "malformed WAL entry, stopping replay");
                        report.stopped_at_corruption = true;
                        break 'segments;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if report.stopped_at_corruption || decoder.pending() > 0 {
            // Includes segments never read because replay stopped early.
            report.discarded_tail_bytes = self.logical_len()?.saturating_sub(valid_end);
            warn!(
                discarded = report.discarded_tail_bytes,
                "discarding incomplete WAL tail"
            );
            self.truncate_stream(skip + valid_end)?;
        }

        if safe_to_trim > 0 {
            self.delete_consumed_bytes(safe_to_trim)?;
            report.trimmed_bytes = safe_to_trim;
        }

        info!(
            segments = report.segments,
            entries = report.entries,
            tombstones = report.tombstones,
            trimmed = report.trimmed_bytes,
            "WAL recovery complete"
        );
        Ok(report)
    }
}
