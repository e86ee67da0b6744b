//! # Config
//!
//! Explicit configuration for every storage component. A single [`Config`]
//! value is built once (from defaults or a JSON file) and handed to each
//! component at construction time; nothing reads global state.
//!
//! ## JSON shape
//!
//! ```json
//! {
//!   "dataDir": "store",
//!   "wal": { "maxSegmentEntries": 1024, "maxSegmentBytes": 1048576, "sync": true },
//!   "memtable": { "structure": "skiplist", "generations": 2, "capacity": 10 },
//!   "sstable": { "blockSize": 2, "bloomFalsePositiveRate": 0.001 },
//!   "compaction": { "algorithm": "sizeTiered", "maxLevels": 4, "levelFileTrigger": 4, "scalingFactor": 2 },
//!   "cache": { "capacity": 100 }
//! }
//! ```
//!
//! Every field is optional; missing fields take their default.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory under `data_dir` holding WAL segments.
pub const WAL_DIR: &str = "logs";
/// Directory under `data_dir` holding SSTables and their Merkle artifacts.
pub const SSTABLE_DIR: &str = "data/sstable";

/// Errors raised while loading, saving or validating a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing the config file failed.
    #[error("config io error: {0}")]
    Io(#[from] io::Error),

    /// The file is not valid JSON for [`Config`].
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds a value no component can work with.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Backing structure of a single memtable generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureType {
    HashMap,
    #[default]
    SkipList,
    BTree,
}

/// Compaction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompactionAlgorithm {
    /// Merge every file of a level into one file at the next level.
    #[default]
    SizeTiered,
    /// Push the oldest file of a level down against its overlapping files.
    Leveled,
}

impl std::str::FromStr for CompactionAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sizetiered" | "size-tiered" | "size_tiered" => Ok(Self::SizeTiered),
            "leveled" => Ok(Self::Leveled),
            other => Err(ConfigError::Invalid(format!(
                "unknown compaction algorithm: {}",
                other
            ))),
        }
    }
}

/// Segment caps for the write-ahead log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WalConfig {
    /// Maximum number of entries that may start in one segment.
    pub max_segment_entries: u64,
    /// Maximum size of one segment file in bytes.
    pub max_segment_bytes: u64,
    /// fsync after every append.
    pub sync: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            max_segment_entries: 1024,
            max_segment_bytes: 1024 * 1024,
            sync: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemtableConfig {
    pub structure: StructureType,
    /// Number of generations rotated round-robin.
    pub generations: usize,
    /// Distinct keys a generation holds before it counts as full.
    pub capacity: usize,
}

impl Default for MemtableConfig {
    fn default() -> Self {
        Self {
            structure: StructureType::SkipList,
            generations: 2,
            capacity: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SstableConfig {
    /// Sparsity of the index and summary zones.
    pub block_size: usize,
    pub bloom_false_positive_rate: f64,
}

impl Default for SstableConfig {
    fn default() -> Self {
        Self {
            block_size: 2,
            bloom_false_positive_rate: 0.001,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompactionConfig {
    pub algorithm: CompactionAlgorithm,
    /// Deepest level; levels are numbered from 1.
    pub max_levels: u32,
    /// Files at a level that trigger automatic compaction. `0` disables it.
    pub level_file_trigger: usize,
    /// Per-level growth of the trigger under the leveled policy.
    pub scaling_factor: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompactionAlgorithm::SizeTiered,
            max_levels: 4,
            level_file_trigger: 4,
            scaling_factor: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Entries held by the read cache. `0` disables caching.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Root directory; WAL and SSTable directories live beneath it.
    pub data_dir: PathBuf,
    pub wal: WalConfig,
    pub memtable: MemtableConfig,
    pub sstable: SstableConfig,
    pub compaction: CompactionConfig,
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            wal: WalConfig::default(),
            memtable: MemtableConfig::default(),
            sstable: SstableConfig::default(),
            compaction: CompactionConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    /// Default configuration rooted at `data_dir`.
    pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Parses and validates the JSON file at `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`]
    /// for malformed JSON, [`ConfigError::Invalid`] if validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = fs::read(path.as_ref())?;
        let config: Config = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Config::load), but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            other => other,
        }
    }

    /// Writes the config as pretty JSON (temp file + rename).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut f, self)?;
            f.write_all(b"\n")?;
            f.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Rejects values that no component can operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.wal.max_segment_entries == 0 {
            return fail("wal.maxSegmentEntries must be > 0");
        }
        if self.wal.max_segment_bytes == 0 {
            return fail("wal.maxSegmentBytes must be > 0");
        }
        if self.memtable.generations == 0 {
            return fail("memtable.generations must be > 0");
        }
        if self.memtable.capacity == 0 {
            return fail("memtable.capacity must be > 0");
        }
        if self.sstable.block_size == 0 {
            return fail("sstable.blockSize must be > 0");
        }
        let fpr = self.sstable.bloom_false_positive_rate;
        if !(fpr > 0.0 && fpr < 1.0) {
            return fail("sstable.bloomFalsePositiveRate must be in (0, 1)");
        }
        if self.compaction.max_levels == 0 {
            return fail("compaction.maxLevels must be > 0");
        }
        if self.compaction.scaling_factor == 0 {
            return fail("compaction.scalingFactor must be > 0");
        }
        Ok(())
    }

    /// `<data_dir>/logs`
    #[must_use]
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join(WAL_DIR)
    }

    /// `<data_dir>/data/sstable`
    #[must_use]
    pub fn sstable_dir(&self) -> PathBuf {
        self.data_dir.join(SSTABLE_DIR)
    }
}
