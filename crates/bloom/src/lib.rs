//! # Bloom Filter
//!
//! A space-efficient probabilistic data structure for set membership testing.
//!
//! A bloom filter can tell you with certainty that a key is **not** in the set
//! (no false negatives), but may occasionally report that a key **is** in the
//! set when it isn't (false positives).
//!
//! ## Usage in the storage engine
//!
//! Every SSTable ends with a bloom-filter zone built from its keys. Exact
//! lookups consult it before touching the summary, index or data zones: a
//! negative answer ends the lookup with no further I/O.
//!
//! ## Hashing
//!
//! The filter holds one *seed* per hash function. Bit `i` for a key is
//! `mix(fnv1a(seed_i ‖ key)) mod M`. Seeds are stored alongside the bit array
//! so a reader reconstructs exactly the functions the writer used.
//!
//! ## Zone format
//!
//! ```text
//! [M: u64 LE][ceil(M/8) bytes of bit array][seed_len: u64 LE][seed] ... until EOF
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use bloom::BloomFilter;
//!
//! let mut bf = BloomFilter::new(1000, 0.01);
//! bf.insert(b"hello");
//! assert!(bf.may_contain(b"hello"));
//! ```
use std::io::{self, Read, Write};

/// Safety cap: a serialized bit array should not exceed 128 MiB.
const MAX_BLOOM_BYTES: u64 = 128 * 1024 * 1024;
/// Safety cap for a single seed record.
const MAX_SEED_BYTES: u64 = 1024;
/// Safety cap for the number of hash functions read back from disk.
const MAX_SEEDS: usize = 64;

/// A bloom filter backed by a bit vector with one seeded hash per function.
#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    /// The bit vector storing the filter state.
    bits: Vec<u8>,
    /// Number of bits in the filter (M).
    num_bits: u64,
    /// One seed per hash function (k seeds).
    seeds: Vec<Vec<u8>>,
}

impl BloomFilter {
    /// Creates a new bloom filter sized for `expected_items` with the given
    /// target `false_positive_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `expected_items` is 0 or `false_positive_rate` is not in `(0, 1)`.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(expected_items > 0, "expected_items must be > 0");
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false_positive_rate must be in (0, 1)"
        );

        // Optimal number of bits: m = -n * ln(p) / (ln(2)^2)
        let n = expected_items as f64;
        let m = (-n * false_positive_rate.ln() / (std::f64::consts::LN_2.powi(2))).ceil() as u64;
        let m = m.max(8);

        // Optimal number of hashes: k = (m/n) * ln(2)
        let k = ((m as f64 / n) * std::f64::consts::LN_2).ceil() as usize;
        let k = k.clamp(1, MAX_SEEDS);

        Self {
            bits: vec![0u8; byte_len(m)],
            num_bits: m,
            seeds: (0..k).map(derive_seed).collect(),
        }
    }

    /// Rebuilds a filter from its raw fields.
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` if `bits` is not exactly `ceil(num_bits / 8)`
    /// bytes long, if `num_bits` is zero, or if no seeds are supplied.
    pub fn from_parts(num_bits: u64, bits: Vec<u8>, seeds: Vec<Vec<u8>>) -> io::Result<Self> {
        if num_bits == 0 {
            return Err(invalid("bloom filter with zero bits"));
        }
        if bits.len() != byte_len(num_bits) {
            return Err(invalid(format!(
                "bloom bit array is {} bytes, expected {} for {} bits",
                bits.len(),
                byte_len(num_bits),
                num_bits
            )));
        }
        if seeds.is_empty() {
            return Err(invalid("bloom filter without hash seeds"));
        }
        Ok(Self {
            bits,
            num_bits,
            seeds,
        })
    }

    /// Inserts a key into the bloom filter.
    pub fn insert(&mut self, key: &[u8]) {
        for i in 0..self.seeds.len() {
            let bit = self.bit_index(i, key);
            self.set_bit(bit);
        }
    }

    /// Alias of [`insert`](BloomFilter::insert).
    pub fn add(&mut self, key: &[u8]) {
        self.insert(key);
    }

    /// Returns `true` if the key **might** be in the set, `false` if it is
    /// **definitely not** in the set.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        (0..self.seeds.len()).all(|i| self.get_bit(self.bit_index(i, key)))
    }

    /// Returns the number of bits in the filter.
    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Returns the number of hash functions.
    #[must_use]
    pub fn num_hashes(&self) -> usize {
        self.seeds.len()
    }

    /// Raw bit array, `ceil(num_bits / 8)` bytes.
    #[must_use]
    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    /// Raw hash seeds, one per hash function.
    #[must_use]
    pub fn seeds(&self) -> &[Vec<u8>] {
        &self.seeds
    }

    /// Returns the size of the serialized zone in bytes.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        8 + self.bits.len() + self.seeds.iter().map(|s| 8 + s.len()).sum::<usize>()
    }

    /// Serializes the filter in zone format.
    ///
    /// ```text
    /// [num_bits: u64][bits][seed_len: u64][seed] ...
    /// ```
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.num_bits.to_le_bytes())?;
        w.write_all(&self.bits)?;
        for seed in &self.seeds {
            w.write_all(&(seed.len() as u64).to_le_bytes())?;
            w.write_all(seed)?;
        }
        Ok(())
    }

    /// Deserializes a filter whose bit array is `bits_len` bytes long. Seed
    /// records are read until the reader reports end of stream.
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` when `bits_len` disagrees with the stored bit
    /// count, a seed record is cut short, or any safety cap is exceeded.
    pub fn read_from<R: Read>(r: &mut R, bits_len: u64) -> io::Result<Self> {
        if bits_len > MAX_BLOOM_BYTES {
            return Err(invalid(format!("bloom filter too large: {} bytes", bits_len)));
        }

        let mut buf8 = [0u8; 8];
        r.read_exact(&mut buf8)?;
        let num_bits = u64::from_le_bytes(buf8);

        let mut bits = vec![0u8; bits_len as usize];
        r.read_exact(&mut bits)?;

        let mut seeds = Vec::new();
        loop {
            match read_full_or_eof(r, &mut buf8)? {
                0 => break,
                8 => {}
                _ => return Err(invalid("truncated bloom seed length")),
            }
            let seed_len = u64::from_le_bytes(buf8);
            if seed_len > MAX_SEED_BYTES {
                return Err(invalid(format!("bloom seed too large: {} bytes", seed_len)));
            }
            if seeds.len() == MAX_SEEDS {
                return Err(invalid("too many bloom seeds"));
            }
            let mut seed = vec![0u8; seed_len as usize];
            r.read_exact(&mut seed)?;
            seeds.push(seed);
        }

        Self::from_parts(num_bits, bits, seeds)
    }

    // ---- Internal helpers ----

    fn bit_index(&self, i: usize, key: &[u8]) -> u64 {
        let basis = fnv1a_64(&self.seeds[i], FNV_OFFSET_BASIS);
        mix64(fnv1a_64(key, basis)) % self.num_bits
    }

    fn set_bit(&mut self, idx: u64) {
        let byte_idx = (idx / 8) as usize;
        let bit_offset = (idx % 8) as u8;
        self.bits[byte_idx] |= 1 << bit_offset;
    }

    fn get_bit(&self, idx: u64) -> bool {
        let byte_idx = (idx / 8) as usize;
        let bit_offset = (idx % 8) as u8;
        (self.bits[byte_idx] >> bit_offset) & 1 == 1
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.seeds.len())
            .field("bytes", &self.bits.len())
            .finish()
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;

fn byte_len(num_bits: u64) -> usize {
    num_bits.div_ceil(8) as usize
}

/// Seed `i`: eight little-endian bytes of `(i + 1) * golden_ratio`.
fn derive_seed(i: usize) -> Vec<u8> {
    (i as u64 + 1)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .to_le_bytes()
        .to_vec()
}

/// FNV-1a 64-bit hash with a configurable starting basis.
fn fnv1a_64(data: &[u8], basis: u64) -> u64 {
    const FNV_PRIME: u64 = 0x00000100000001b3;
    let mut hash = basis;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// 64-bit finalizer (splitmix64) so nearby FNV states spread across the array.
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

/// Fills `buf` completely, or returns 0 on a clean end of stream. A short
/// read in the middle of `buf` returns the number of bytes obtained.
fn read_full_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn invalid<E>(msg: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
