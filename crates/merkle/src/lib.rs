//! # Merkle
//!
//! Integrity artifact built once per SSTable flush.
//!
//! Leaves are SHA-256 digests of `key ‖ value` blobs in flush order. Each
//! parent hashes the concatenation of its two children; an odd node at the
//! end of a level is paired with itself.
//!
//! ## Artifact format
//!
//! A text file `merkle_<ts>.txt`. The first line is the hex root. The
//! following lines hold the remaining levels, top-down, one level per line
//! with space-separated hex digests:
//!
//! ```text
//! <root>
//! <h0> <h1>
//! <h0> <h1> <h2> <h3>
//! ```

use sha2::{Digest as _, Sha256};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// A SHA-256 digest.
pub type Hash = [u8; 32];

/// Artifact file name for a table created at `timestamp`.
#[must_use]
pub fn artifact_name(timestamp: u128) -> String {
    format!("merkle_{}.txt", timestamp)
}

fn hash_parts(parts: &[&[u8]]) -> Hash {
    let mut h = Sha256::new();
    for p in parts {
        h.update(p);
    }
    h.finalize().into()
}

/// Lowercase hex encoding of a digest.
#[must_use]
pub fn to_hex(hash: &Hash) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parses a 64-character hex digest.
pub fn from_hex(s: &str) -> io::Result<Hash> {
    let s = s.trim();
    if s.len() != 64 || !s.is_ascii() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad merkle digest {:?}", s),
        ));
    }
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[2 * i..2 * i + 2], 16)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    }
    Ok(out)
}

/// Incremental leaf collector used while a table is being written.
#[derive(Debug, Default, Clone)]
pub struct MerkleBuilder {
    leaves: Vec<Hash>,
}

impl MerkleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one leaf: the digest of `parts` concatenated.
    pub fn push(&mut self, parts: &[&[u8]]) {
        self.leaves.push(hash_parts(parts));
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn finish(self) -> MerkleTree {
        MerkleTree::from_leaves(self.leaves)
    }
}

/// Complete tree, leaves at `levels[0]`, root alone in the last level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    /// Builds the tree over `blobs` in order.
    pub fn build<I, B>(blobs: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let leaves = blobs.into_iter().map(|b| hash_parts(&[b.as_ref()])).collect();
        Self::from_leaves(leaves)
    }

    fn from_leaves(leaves: Vec<Hash>) -> Self {
        if leaves.is_empty() {
            // An empty table still gets a well-defined root.
            return Self {
                levels: vec![vec![hash_parts(&[])]],
            };
        }
        let mut levels = vec![leaves];
        while let Some(level) = levels.last().filter(|l| l.len() > 1) {
            let parent = level
                .chunks(2)
                .map(|pair| {
                    let right = pair.get(1).unwrap_or(&pair[0]);
                    hash_parts(&[pair[0].as_slice(), right.as_slice()])
                })
                .collect();
            levels.push(parent);
        }
        Self { levels }
    }

    #[must_use]
    pub fn root(&self) -> Hash {
        // `from_leaves` never produces an empty level list.
        self.levels.last().and_then(|l| l.first()).copied().unwrap_or_default()
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    pub fn height(&self) -> usize {
        self.levels.len()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for level in self.levels.iter().rev() {
            let line: Vec<String> = level.iter().map(to_hex).collect();
            writeln!(w, "{}", line.join(" "))?;
        }
        Ok(())
    }

    /// Writes the artifact to `path` through a temp file and rename.
    pub fn persist<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("txt.tmp");
        {
            let mut w = BufWriter::new(File::create(&tmp)?);
            self.write_to(&mut w)?;
            w.flush()?;
            w.get_ref().sync_all()?;
        }
        fs::rename(&tmp, path)
    }
}

/// Root stored in the artifact at `path` (its first line).
pub fn read_root<P: AsRef<Path>>(path: P) -> io::Result<Hash> {
    let mut first = String::new();
    BufReader::new(File::open(path)?).read_line(&mut first)?;
    from_hex(&first)
}
