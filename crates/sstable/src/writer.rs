use anyhow::{bail, ensure, Context, Result};
use bloom::BloomFilter;
use config::SstableConfig;
use memtable::MemTableEntry;
use merkle::MerkleBuilder;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::format::{write_pointer, write_record, Header, HEADER_SIZE};
use crate::TableHandle;

/// Zone sparsity and bloom sizing.
#[derive(Debug, Clone, PartialEq)]
pub struct WriterOptions {
    /// Every `block_size`-th data record becomes an index leader, and every
    /// `block_size`-th index record a summary leader.
    pub block_size: usize,
    pub bloom_false_positive_rate: f64,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self::from(&SstableConfig::default())
    }
}

impl From<&SstableConfig> for WriterOptions {
    fn from(cfg: &SstableConfig) -> Self {
        Self {
            block_size: cfg.block_size,
            bloom_false_positive_rate: cfg.bloom_false_positive_rate,
        }
    }
}

/// Writes sorted runs into a table directory.
///
/// Each call produces one table plus its Merkle artifact. The table is
/// written to `<name>.tmp`, fsynced and renamed into place, so a crash never
/// leaves a partial file under a table name.
#[derive(Debug, Clone)]
pub struct SSTableWriter {
    dir: PathBuf,
    options: WriterOptions,
}

impl SSTableWriter {
    pub fn new<P: AsRef<Path>>(dir: P, options: WriterOptions) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            options,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Flushes a key-ascending, deduplicated run at `level`.
    ///
    /// # Errors
    ///
    /// Returns an error if `entries` is empty or unsorted, or on any I/O
    /// failure. Nothing is published in either case.
    pub fn flush(&self, entries: &[MemTableEntry], level: u32) -> Result<TableHandle> {
        match self.write_stream(entries.iter().cloned().map(Ok), level)? {
            Some(handle) => Ok(handle),
            None => bail!("refusing to write an empty SSTable (empty run)"),
        }
    }

    /// Streams entries into a new table at `level`.
    ///
    /// Returns `Ok(None)` without creating a file when the stream is empty.
    /// The first error from the stream aborts the write.
    pub fn write_stream<I>(&self, entries: I, level: u32) -> Result<Option<TableHandle>>
    where
        I: Iterator<Item = Result<MemTableEntry>>,
    {
        ensure!(self.options.block_size > 0, "block_size must be > 0");
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;

        let handle = self.fresh_handle(level);
        let tmp_path = handle.path.with_extension("db.tmp");

        match self.write_tmp(&tmp_path, &handle, entries) {
            Ok(true) => {}
            Ok(false) => {
                let _ = fs::remove_file(&tmp_path);
                return Ok(None);
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                let _ = fs::remove_file(handle.merkle_path());
                return Err(e);
            }
        }

        fs::rename(&tmp_path, &handle.path)?;

        // A crash after rename but before the directory sync can lose the entry.
        if let Ok(dir) = fs::File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        info!(path = %handle.path.display(), level, "sstable published");
        Ok(Some(handle))
    }

    /// Writes every zone to `tmp_path` and the Merkle artifact. Returns
    /// `false` if the stream was empty.
    fn write_tmp<I>(&self, tmp_path: &Path, handle: &TableHandle, entries: I) -> Result<bool>
    where
        I: Iterator<Item = Result<MemTableEntry>>,
    {
        let block = self.options.block_size;
        let raw = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(tmp_path)?;
        let mut file = BufWriter::new(raw);

        // Header is reserved now and written once every zone is sized.
        file.write_all(&[0u8; HEADER_SIZE as usize])?;
        let mut pos = HEADER_SIZE;

        let mut keys: Vec<Vec<u8>> = Vec::new();
        let mut index: Vec<(usize, u64)> = Vec::new();
        let mut merkle = MerkleBuilder::new();

        // DATA
        for entry in entries {
            let entry = entry?;
            if let Some(prev) = keys.last() {
                ensure!(
                    *prev < entry.key,
                    "run is not strictly ascending at key {:?}",
                    String::from_utf8_lossy(&entry.key)
                );
            }
            if keys.len() % block == 0 {
                index.push((keys.len(), pos));
            }
            merkle.push(&[entry.key.as_slice(), entry.value.as_slice()]);
            pos += write_record(&mut file, &entry)?;
            keys.push(entry.key);
        }

        if keys.is_empty() {
            return Ok(false);
        }
        let data_end = pos;

        // INDEX
        let mut summary: Vec<(usize, u64)> = Vec::new();
        for (n, (key_idx, data_offset)) in index.iter().enumerate() {
            if n % block == 0 {
                summary.push((*key_idx, pos));
            }
            pos += write_pointer(&mut file, &keys[*key_idx], *data_offset)?;
        }
        let index_end = pos;

        // SUMMARY
        for (key_idx, index_offset) in &summary {
            pos += write_pointer(&mut file, &keys[*key_idx], *index_offset)?;
        }

        // BLOOM, sized from the exact key count.
        let bloom_start = pos;
        let mut bloom = BloomFilter::new(keys.len(), self.options.bloom_false_positive_rate);
        for k in &keys {
            bloom.add(k);
        }
        bloom.write_to(&mut file)?;

        let header = Header::from_sizes(
            data_end - HEADER_SIZE,
            index_end - data_end,
            bloom_start,
            bloom.bits().len() as u64,
        );
        file.seek(SeekFrom::Start(0))?;
        header.write_to(&mut file)?;

        file.flush()?;
        file.into_inner()?.sync_all()?;

        merkle
            .finish()
            .persist(handle.merkle_path())
            .context("writing merkle artifact")?;

        debug!(
            entries = keys.len(),
            index_leaders = index.len(),
            summary_leaders = summary.len(),
            bytes = bloom_start + bloom.serialized_size() as u64,
            "sstable zones written"
        );
        Ok(true)
    }

    /// Handle with a creation timestamp no other table in the directory uses.
    fn fresh_handle(&self, level: u32) -> TableHandle {
        let mut ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        loop {
            let handle = TableHandle::new(&self.dir, ts, level);
            let taken = handle.merkle_path().exists()
                || handle.path.exists()
                || handle.path.with_extension("db.tmp").exists();
            if !taken {
                return handle;
            }
            ts += 1;
        }
    }
}
