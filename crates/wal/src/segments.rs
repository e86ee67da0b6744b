//! Segmented log writer: rotation, front trimming and the skip marker.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::entry::WalEntry;
use crate::{WalError, MAX_KEY_BYTES, MAX_VALUE_BYTES};

/// File name prefix shared by all segments.
pub const SEGMENT_PREFIX: &str = "wal.0.0.";
/// Name of the file recording how many leading bytes of segment 0 are consumed.
///
/// It holds `<skip>`, or `<skip> <first>` while a trim is deleting the
/// segments below index `<first>`.
pub const SKIP_MARKER: &str = "remaining_bytes";

/// `wal.0.0.<index>.log`
#[must_use]
pub fn segment_file_name(index: u64) -> String {
    format!("{}{}.log", SEGMENT_PREFIX, index)
}

fn parse_segment_index(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(".log")?
        .parse()
        .ok()
}

/// Segment caps and durability settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalOptions {
    /// Entries that may start in one segment before it rotates.
    pub max_segment_entries: u64,
    /// Byte capacity of one segment.
    pub max_segment_bytes: u64,
    /// `fsync` after every append.
    pub sync: bool,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            max_segment_entries: 1024,
            max_segment_bytes: 1024 * 1024,
            sync: true,
        }
    }
}

/// Append-only segmented WAL.
///
/// There is exactly one writer per directory. Appends, rotation and trimming
/// all go through `&mut self`, which serializes them against each other.
pub struct Wal {
    pub(crate) dir: PathBuf,
    options: WalOptions,
    /// Index of the segment currently receiving appends.
    segment: u64,
    /// Entries that started in the current segment.
    segment_entries: u64,
    /// Bytes already in the current segment.
    segment_bytes: u64,
    /// Lazily opened handle on the current segment.
    file: Option<File>,
    /// A torn entry could not be cut; appends are refused until reopen.
    poisoned: bool,
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("dir", &self.dir)
            .field("segment", &self.segment)
            .field("segment_entries", &self.segment_entries)
            .field("segment_bytes", &self.segment_bytes)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl Wal {
    /// Opens the log stored in `dir`, creating the directory if needed.
    ///
    /// A trim interrupted by a crash is completed first: segments its marker
    /// names as consumed are deleted and the rest renumbered densely from 0.
    /// Appends continue at the end of the highest segment.
    ///
    /// # Errors
    ///
    /// Returns [`WalError::Io`] if either cap is zero or on any filesystem error.
    pub fn open<P: AsRef<Path>>(dir: P, options: WalOptions) -> Result<Self, WalError> {
        if options.max_segment_bytes == 0 || options.max_segment_entries == 0 {
            return Err(WalError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "WAL segment caps must be > 0",
            )));
        }
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut wal = Self {
            dir,
            options,
            segment: 0,
            segment_entries: 0,
            segment_bytes: 0,
            file: None,
            poisoned: false,
        };
        wal.finish_trim()?;
        let segments = wal.list_segments()?;
        wal.renumber(&segments)?;
        wal.refresh_tail(false)?;
        Ok(wal)
    }

    /// Directory holding the segments.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn options(&self) -> &WalOptions {
        &self.options
    }

    /// Index of the segment currently receiving appends.
    #[must_use]
    pub fn current_segment(&self) -> u64 {
        self.segment
    }

    /// Serializes a new entry stamped with the current second and appends it.
    ///
    /// The returned entry carries the timestamp the memtable entry must use.
    ///
    /// # Errors
    ///
    /// [`WalError::TooLarge`] if the key or value exceeds its cap, and
    /// [`WalError::Io`] if a segment cannot be created or written. A failed
    /// append must not be acknowledged.
    pub fn append(&mut self, key: &[u8], value: &[u8], tombstone: bool) -> Result<WalEntry, WalError> {
        if key.len() > MAX_KEY_BYTES {
            return Err(WalError::TooLarge(format!(
                "key is {} bytes (max {})",
                key.len(),
                MAX_KEY_BYTES
            )));
        }
        if value.len() > MAX_VALUE_BYTES {
            return Err(WalError::TooLarge(format!(
                "value is {} bytes (max {})",
                value.len(),
                MAX_VALUE_BYTES
            )));
        }
        let entry = WalEntry::new(key.to_vec(), value.to_vec(), tombstone);
        self.append_entry(&entry)?;
        Ok(entry)
    }

    /// Appends an already-built entry, splitting it across segments when it
    /// does not fit in the remaining capacity.
    ///
    /// A failed write leaves no partial entry behind: segments the entry
    /// reached are cut back to where they stood before the call.
    pub fn append_entry(&mut self, entry: &WalEntry) -> Result<(), WalError> {
        if self.poisoned {
            return Err(WalError::Io(io::Error::new(
                io::ErrorKind::Other,
                "WAL holds a torn entry, reopen to recover",
            )));
        }
        let bytes = entry.encode();
        let (segment, entries, len) = (self.segment, self.segment_entries, self.segment_bytes);

        match self.write_entry_bytes(&bytes) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(undo) = self.roll_back(segment, entries, len) {
                    warn!(error = %undo, "could not cut torn WAL entry, refusing appends");
                    self.poisoned = true;
                }
                Err(e)
            }
        }
    }

    fn write_entry_bytes(&mut self, bytes: &[u8]) -> Result<(), WalError> {
        if self.segment_entries >= self.options.max_segment_entries
            || self.segment_bytes >= self.options.max_segment_bytes
        {
            self.rotate()?;
        }
        self.segment_entries += 1;

        let mut rest = bytes;
        loop {
            let room = (self.options.max_segment_bytes - self.segment_bytes) as usize;
            let n = room.min(rest.len());
            self.current_file()?.write_all(&rest[..n])?;
            self.segment_bytes += n as u64;
            rest = &rest[n..];
            if rest.is_empty() {
                break;
            }
            // Entry straddles into the next segment.
            self.rotate()?;
        }

        if self.options.sync {
            if let Some(f) = self.file.as_mut() {
                f.sync_all()?;
            }
        }
        Ok(())
    }

    /// Restores the append position to `segment` at `len` bytes, deleting
    /// any later segment a failed append created.
    fn roll_back(&mut self, segment: u64, entries: u64, len: u64) -> Result<(), WalError> {
        self.file = None;
        for index in segment + 1..=self.segment {
            let path = self.dir.join(segment_file_name(index));
            match fs::metadata(&path) {
                Ok(meta) if meta.is_file() => fs::remove_file(&path)?,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(WalError::Io(e)),
            }
        }
        let path = self.dir.join(segment_file_name(segment));
        match OpenOptions::new().write(true).open(&path) {
            Ok(f) => {
                f.set_len(len)?;
                f.sync_all()?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(WalError::Io(e)),
        }
        debug!(segment, len, "rolled back partial WAL append");
        self.segment = segment;
        self.segment_entries = entries;
        self.segment_bytes = len;
        Ok(())
    }

    /// Forces the current segment to disk.
    pub fn sync_to_disk(&mut self) -> Result<(), WalError> {
        if let Some(f) = self.file.as_mut() {
            f.flush()?;
            f.sync_all()?;
        }
        Ok(())
    }

    /// Paths of all segments in log order.
    pub fn segment_paths(&self) -> Result<Vec<PathBuf>, WalError> {
        Ok(self.list_segments()?.into_iter().map(|(_, p)| p).collect())
    }

    /// Leading bytes of segment 0 that recovery skips.
    pub fn skip_bytes(&self) -> Result<u64, WalError> {
        Ok(self.read_marker()?.0)
    }

    /// Total logical bytes in the log (all segments minus the skipped prefix).
    pub fn logical_len(&self) -> Result<u64, WalError> {
        let mut total = 0;
        for (_, path) in self.list_segments()? {
            total += fs::metadata(&path)?.len();
        }
        Ok(total.saturating_sub(self.skip_bytes()?))
    }

    /// Removes `n` logical bytes from the front of the log.
    ///
    /// Fully consumed segments are deleted and the survivors renamed to
    /// `0..k`. If the first survivor is only partly consumed, the consumed
    /// byte count is stored in the skip marker instead of rewriting the file.
    ///
    /// The new marker, together with the index of the first surviving
    /// segment, is on disk before anything is deleted, so a crash at any
    /// step is completed by the next [`Wal::open`].
    pub fn delete_consumed_bytes(&mut self, n: u64) -> Result<(), WalError> {
        if n == 0 {
            return Ok(());
        }
        self.file = None;

        let segments = self.list_segments()?;
        let mut remaining = n + self.skip_bytes()?;
        let mut consumed = 0usize;
        for (_, path) in &segments {
            let len = fs::metadata(path)?.len();
            if remaining < len {
                break;
            }
            remaining -= len;
            consumed += 1;
        }
        let (doomed, kept) = segments.split_at(consumed);

        if kept.is_empty() && remaining > 0 {
            warn!(excess = remaining, "trim request exceeded WAL length");
            remaining = 0;
        }

        if let Some((last, _)) = doomed.last() {
            let first = kept.first().map_or(last + 1, |(index, _)| *index);
            self.write_marker(remaining, Some(first))?;
            for (_, path) in doomed {
                fs::remove_file(path)?;
            }
        }
        self.write_marker(remaining, None)?;
        self.renumber(kept)?;
        self.refresh_tail(!kept.is_empty())?;

        info!(
            trimmed = n,
            deleted_segments = doomed.len(),
            skip = remaining,
            "trimmed WAL"
        );
        Ok(())
    }

    /// Cuts the concatenated segment stream at physical byte `end`, dropping
    /// everything after it.
    pub(crate) fn truncate_stream(&mut self, end: u64) -> Result<(), WalError> {
        self.file = None;
        let mut start = 0u64;
        for (_, path) in self.list_segments()? {
            let len = fs::metadata(&path)?.len();
            if start + len <= end {
                start += len;
                continue;
            }
            if start >= end {
                fs::remove_file(&path)?;
            } else {
                let f = OpenOptions::new().write(true).open(&path)?;
                f.set_len(end - start)?;
                f.sync_all()?;
            }
            start += len;
        }
        self.refresh_tail(false)
    }

    // ---- Internal helpers ----

    pub(crate) fn list_segments(&self) -> Result<Vec<(u64, PathBuf)>, WalError> {
        let mut segments: Vec<(u64, PathBuf)> = fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name();
                let index = parse_segment_index(name.to_str()?)?;
                Some((index, e.path()))
            })
            .collect();
        segments.sort_by_key(|(index, _)| *index);
        Ok(segments)
    }

    /// Renames `segments` (already in log order) to a dense `0..k` sequence.
    fn renumber(&self, segments: &[(u64, PathBuf)]) -> Result<(), WalError> {
        for (target, (index, path)) in segments.iter().enumerate() {
            let target = target as u64;
            if *index != target {
                let dest = self.dir.join(segment_file_name(target));
                debug!(from = *index, to = target, "renumbering WAL segment");
                fs::rename(path, dest)?;
            }
        }
        Ok(())
    }

    /// Reads the skip marker as `(skip, first)`; see [`SKIP_MARKER`].
    fn read_marker(&self) -> Result<(u64, Option<u64>), WalError> {
        let path = self.dir.join(SKIP_MARKER);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((0, None)),
            Err(e) => return Err(WalError::Io(e)),
        };
        let bad = |reason: String| WalError::Marker(format!("{:?}: {}", text.trim(), reason));
        let mut fields = text.split_whitespace();
        let skip = fields
            .next()
            .ok_or_else(|| bad("empty".to_string()))?
            .parse()
            .map_err(|e| bad(format!("{}", e)))?;
        let first = match fields.next() {
            Some(f) => Some(f.parse().map_err(|e| bad(format!("{}", e)))?),
            None => None,
        };
        if fields.next().is_some() {
            return Err(bad("trailing fields".to_string()));
        }
        Ok((skip, first))
    }

    fn write_marker(&self, skip: u64, first: Option<u64>) -> Result<(), WalError> {
        let path = self.dir.join(SKIP_MARKER);
        if skip == 0 && first.is_none() {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(WalError::Io(e)),
            }
            return Ok(());
        }
        let tmp = self.dir.join(format!("{}.tmp", SKIP_MARKER));
        {
            let mut f = File::create(&tmp)?;
            match first {
                Some(first) => write!(f, "{} {}", skip, first)?,
                None => write!(f, "{}", skip)?,
            }
            f.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Deletes the segments an interrupted trim had already consumed.
    fn finish_trim(&self) -> Result<(), WalError> {
        let (skip, Some(first)) = self.read_marker()? else {
            return Ok(());
        };
        let mut deleted = 0usize;
        for (index, path) in self.list_segments()? {
            if index < first {
                fs::remove_file(&path)?;
                deleted += 1;
            }
        }
        info!(skip, first, deleted, "completed interrupted WAL trim");
        self.write_marker(skip, None)
    }

    /// Re-derives the append position from the files on disk.
    fn refresh_tail(&mut self, keep_entry_count: bool) -> Result<(), WalError> {
        self.file = None;
        match self.list_segments()?.last() {
            Some((index, path)) => {
                self.segment = *index;
                self.segment_bytes = fs::metadata(path)?.len();
            }
            None => {
                self.segment = 0;
                self.segment_bytes = 0;
            }
        }
        if !keep_entry_count {
            self.segment_entries = 0;
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), WalError> {
        if let Some(f) = self.file.take() {
            if self.options.sync {
                f.sync_all()?;
            }
        }
        self.segment += 1;
        self.segment_entries = 0;
        self.segment_bytes = 0;
        debug!(segment = self.segment, "rotated WAL segment");
        Ok(())
    }

    fn current_file(&mut self) -> Result<&mut File, WalError> {
        let file = match self.file.take() {
            Some(f) => f,
            None => {
                let path = self.dir.join(segment_file_name(self.segment));
                OpenOptions::new().create(true).append(true).open(path)?
            }
        };
        Ok(self.file.insert(file))
    }
}
