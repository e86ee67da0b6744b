use anyhow::{bail, ensure, Context, Result};
use bloom::BloomFilter;
use memtable::MemTableEntry;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::format::{pointer_len, read_pointer, read_record, record_len, Header, HEADER_SIZE};
use crate::TableHandle;

/// What a lookup is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query<'a> {
    /// A single key.
    Exact(&'a [u8]),
    /// Every key starting with the prefix.
    Prefix(&'a [u8]),
    /// Every key in `[lo, hi]`.
    Range(&'a [u8], &'a [u8]),
}

impl<'a> Query<'a> {
    /// Smallest key the query can match.
    fn lower(&self) -> &'a [u8] {
        match *self {
            Query::Exact(k) | Query::Prefix(k) => k,
            Query::Range(lo, _) => lo,
        }
    }

    /// Position of `key` relative to the matching keys.
    fn classify(&self, key: &[u8]) -> Ordering {
        match *self {
            Query::Exact(k) => key.cmp(k),
            Query::Prefix(p) => {
                if key.starts_with(p) {
                    Ordering::Equal
                } else {
                    key.cmp(p)
                }
            }
            Query::Range(lo, hi) => {
                if key < lo {
                    Ordering::Less
                } else if key > hi {
                    Ordering::Greater
                } else {
                    Ordering::Equal
                }
            }
        }
    }
}

/// Reads one table.
///
/// [`open`](SSTableReader::open) loads and validates the header and the bloom
/// filter. Every query opens its own file handle, so a reader can be shared
/// by any number of threads without locking.
#[derive(Debug, Clone)]
pub struct SSTableReader {
    path: PathBuf,
    header: Header,
    bloom: BloomFilter,
    file_len: u64,
}

impl SSTableReader {
    /// # Errors
    ///
    /// Returns an error if the file is missing, shorter than the header, its
    /// header is inconsistent, or the bloom zone is malformed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut f = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let file_len = f.metadata()?.len();
        ensure!(file_len >= HEADER_SIZE, "sstable file too small: {}", path.display());

        let header = Header::read_from(&mut f)?;
        header
            .validate(file_len)
            .with_context(|| format!("invalid header in {}", path.display()))?;

        f.seek(SeekFrom::Start(header.bloom_start))?;
        let mut zone = BufReader::new(f);
        let bloom = BloomFilter::read_from(&mut zone, header.bloom_bits_len)
            .with_context(|| format!("invalid bloom zone in {}", path.display()))?;

        Ok(Self {
            path,
            header,
            bloom,
            file_len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn bloom(&self) -> &BloomFilter {
        &self.bloom
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Point lookup through the bloom, summary, index and data stages.
    ///
    /// Returns the stored record, which may be a tombstone. `Ok(None)` means
    /// the key is not in this table.
    pub fn get(&self, key: &[u8]) -> Result<Option<MemTableEntry>> {
        if !self.bloom.may_contain(key) {
            return Ok(None);
        }
        let mut f = self.handle()?;
        let query = Query::Exact(key);
        let Some((lo, hi)) = self.locate(&mut f, query, true)? else {
            return Ok(None);
        };

        let mut pos = lo;
        f.seek(SeekFrom::Start(pos))?;
        while pos < hi {
            let entry = read_record(&mut f)
                .with_context(|| format!("reading record at {} in {}", pos, self.path.display()))?;
            pos += record_len(&entry);
            match entry.key.as_slice().cmp(key) {
                Ordering::Less => continue,
                Ordering::Equal => return Ok(Some(entry)),
                Ordering::Greater => break,
            }
        }
        Ok(None)
    }

    /// Value of `key` if it is present and not deleted.
    pub fn query(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.get(key)?.filter(|e| !e.tombstone).map(|e| e.value))
    }

    /// Records whose key starts with `prefix`, ascending, tombstones included.
    pub fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<MemTableEntry>> {
        self.scan_iter(Query::Prefix(prefix))?.collect()
    }

    /// Records with `lo <= key <= hi`, ascending, tombstones included.
    pub fn range_scan(&self, lo: &[u8], hi: &[u8]) -> Result<Vec<MemTableEntry>> {
        if lo > hi {
            return Ok(Vec::new());
        }
        self.scan_iter(Query::Range(lo, hi))?.collect()
    }

    /// Lazy cursor over the records matching a prefix or range query.
    ///
    /// The cursor starts at the data bracket located through the summary and
    /// index zones and runs past it until a key beyond the query is read.
    pub fn scan_iter(&self, query: Query<'_>) -> Result<ScanIter> {
        let mut f = self.handle()?;
        let start = match self.locate(&mut f, query, false)? {
            Some((lo, _)) => lo,
            None => self.header.data_end,
        };
        let (lower, upper) = match query {
            Query::Exact(k) => (k.to_vec(), Bound::Exact),
            Query::Prefix(p) => (p.to_vec(), Bound::Prefix),
            Query::Range(lo, hi) => (lo.to_vec(), Bound::Upper(hi.to_vec())),
        };
        Ok(ScanIter {
            records: self.data_iter(f, start)?,
            lower,
            upper,
            done: false,
        })
    }

    /// Every record in the data zone, in key order.
    pub fn iter(&self) -> Result<DataIter> {
        let f = self.handle()?;
        self.data_iter(f, self.header.data_start())
    }

    /// First and last key stored in the table.
    pub fn key_range(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut f = self.handle()?;
        let h = &self.header;

        f.seek(SeekFrom::Start(h.data_start()))?;
        let first = read_record(&mut f)?.key;

        let (_, last_index) = self.last_pointer(&mut f, h.summary_start(), h.bloom_start)?;
        let (_, last_data) = self.last_pointer(&mut f, last_index, h.summary_start())?;
        let mut last = first.clone();
        for entry in self.data_iter(f, last_data)? {
            last = entry?.key;
        }
        Ok((first, last))
    }

    /// Rebuilds the Merkle root from the data zone and compares it with the
    /// artifact written at flush time.
    ///
    /// # Errors
    ///
    /// Fails if the artifact is missing or unreadable, or the roots differ.
    pub fn verify_integrity(&self) -> Result<()> {
        let handle = TableHandle::from_path(&self.path)
            .with_context(|| format!("not a table file name: {}", self.path.display()))?;
        let expected = merkle::read_root(handle.merkle_path())
            .with_context(|| format!("reading merkle artifact for {}", self.path.display()))?;

        let mut builder = merkle::MerkleBuilder::new();
        for entry in self.iter()? {
            let entry = entry?;
            builder.push(&[entry.key.as_slice(), entry.value.as_slice()]);
        }
        let actual = builder.finish().root();
        if actual != expected {
            bail!(
                "merkle root mismatch for {}: expected {}, computed {}",
                self.path.display(),
                merkle::to_hex(&expected),
                merkle::to_hex(&actual)
            );
        }
        Ok(())
    }

    // ---- Internal helpers ----

    fn handle(&self) -> Result<BufReader<File>> {
        let f = File::open(&self.path).with_context(|| format!("opening {}", self.path.display()))?;
        Ok(BufReader::new(f))
    }

    fn data_iter(&self, mut f: BufReader<File>, start: u64) -> Result<DataIter> {
        f.seek(SeekFrom::Start(start))?;
        Ok(DataIter {
            file: f,
            pos: start,
            end: self.header.data_end,
            failed: false,
        })
    }

    /// Summary then index stage: the data-zone bracket that may hold the
    /// query's first match.
    ///
    /// With `exact`, a key below the first leader is reported as absent.
    fn locate(
        &self,
        f: &mut BufReader<File>,
        query: Query<'_>,
        exact: bool,
    ) -> Result<Option<(u64, u64)>> {
        let h = &self.header;
        let target = query.lower();
        let Some((lo, hi)) =
            self.narrow(f, h.summary_start(), h.bloom_start, h.summary_start(), target, exact)?
        else {
            return Ok(None);
        };
        self.narrow(f, lo, hi, h.data_end, target, exact)
    }

    /// Scans the pointer zone `[start, end)` for the leader pair bracketing
    /// `target`. The bracket ends at the next leader's offset, or at
    /// `fall_end` when the zone runs out.
    fn narrow(
        &self,
        f: &mut BufReader<File>,
        start: u64,
        end: u64,
        fall_end: u64,
        target: &[u8],
        exact: bool,
    ) -> Result<Option<(u64, u64)>> {
        if start >= end {
            return Ok(None);
        }
        f.seek(SeekFrom::Start(start))?;
        let (k1, mut o1) = read_pointer(f)
            .with_context(|| format!("reading pointer at {} in {}", start, self.path.display()))?;
        if exact && target < k1.as_slice() {
            return Ok(None);
        }
        let mut pos = start + pointer_len(&k1);
        while pos < end {
            let (k2, o2) = read_pointer(f)
                .with_context(|| format!("reading pointer at {} in {}", pos, self.path.display()))?;
            if target < k2.as_slice() {
                return Ok(Some((o1, o2)));
            }
            pos += pointer_len(&k2);
            o1 = o2;
        }
        Ok(Some((o1, fall_end)))
    }

    /// Last `(key, offset)` pointer of the zone `[start, end)`.
    fn last_pointer(&self, f: &mut BufReader<File>, start: u64, end: u64) -> Result<(Vec<u8>, u64)> {
        ensure!(start < end, "empty pointer zone in {}", self.path.display());
        f.seek(SeekFrom::Start(start))?;
        let mut pos = start;
        let mut last = None;
        while pos < end {
            let (k, o) = read_pointer(f)?;
            pos += pointer_len(&k);
            last = Some((k, o));
        }
        last.with_context(|| format!("empty pointer zone in {}", self.path.display()))
    }
}

/// Sequential reader over the data zone.
pub struct DataIter {
    file: BufReader<File>,
    pos: u64,
    end: u64,
    failed: bool,
}

impl Iterator for DataIter {
    type Item = Result<MemTableEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.end {
            return None;
        }
        match read_record(&mut self.file) {
            Ok(entry) => {
                self.pos += record_len(&entry);
                Some(Ok(entry))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(anyhow::Error::new(e).context(format!("reading record at {}", self.pos))))
            }
        }
    }
}

enum Bound {
    Exact,
    Prefix,
    Upper(Vec<u8>),
}

/// Cursor over the records matching one prefix or range query.
pub struct ScanIter {
    records: DataIter,
    lower: Vec<u8>,
    upper: Bound,
    done: bool,
}

impl ScanIter {
    fn classify(&self, key: &[u8]) -> Ordering {
        let q = match &self.upper {
            Bound::Exact => Query::Exact(&self.lower),
            Bound::Prefix => Query::Prefix(&self.lower),
            Bound::Upper(hi) => Query::Range(&self.lower, hi),
        };
        q.classify(key)
    }
}

impl Iterator for ScanIter {
    type Item = Result<MemTableEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let entry = match self.records.next()? {
                Ok(e) => e,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            match self.classify(&entry.key) {
                Ordering::Less => continue,
                Ordering::Equal => return Some(Ok(entry)),
                Ordering::Greater => self.done = true,
            }
        }
        None
    }
}
