//! # Manifest - Level Listing
//!
//! Records which table files are live and at which level, so a restart
//! rebuilds the same level layout and readers only ever see published
//! tables.
//!
//! ## File Format
//!
//! One table per line, levels numbered from 1:
//!
//! ```text
//! L1:file_1708600000000000000_1.db
//! L2:file_1708599999000000000_2.db
//! ```
//!
//! Lines starting with `#` are comments. Empty lines are ignored.
//!
//! ## Crash Safety
//!
//! The manifest is rewritten whole: write `MANIFEST.tmp`, fsync, rename over
//! `MANIFEST`. A reader of the directory sees either the old or the new
//! listing, never a mix.

use anyhow::{bail, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Name of the manifest file within the SSTable directory.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

/// Level assignment of one table file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
    /// Base name, e.g. `file_<nanos>_<level>.db`.
    pub file_name: String,
    /// Level, starting at 1.
    pub level: u32,
}

/// In-memory copy of the manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    /// Whether the file existed when loaded.
    existed: bool,
    pub entries: Vec<TableMeta>,
}

impl Manifest {
    /// Loads `sst_dir/MANIFEST`, or an empty listing if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_create(sst_dir: &Path) -> Result<Self> {
        let path = sst_dir.join(MANIFEST_FILENAME);
        if !path.exists() {
            return Ok(Self {
                path,
                existed: false,
                entries: Vec::new(),
            });
        }

        let file = File::open(&path)
            .with_context(|| format!("failed to open manifest at {}", path.display()))?;
        let mut entries = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("failed to read manifest line {}", n + 1))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            entries.push(parse_line(trimmed).with_context(|| format!("manifest line {}", n + 1))?);
        }

        Ok(Self {
            path,
            existed: true,
            entries,
        })
    }

    /// `false` for a directory that never had a manifest.
    #[must_use]
    pub fn existed(&self) -> bool {
        self.existed
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persists the listing (tmp + fsync + rename).
    pub fn save(&mut self) -> Result<()> {
        let tmp_path = self.path.with_file_name(MANIFEST_TMP_FILENAME);
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            Self::write_contents(&mut f, &self.entries)?;
            f.flush()?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to publish manifest at {}", self.path.display()))?;
        self.existed = true;
        Ok(())
    }

    fn write_contents(f: &mut File, entries: &[TableMeta]) -> Result<()> {
        writeln!(f, "# SSTable manifest")?;
        writeln!(f, "# Format: L<level>:<file>")?;
        for entry in entries {
            writeln!(f, "L{}:{}", entry.level, entry.file_name)?;
        }
        Ok(())
    }

    /// File names listed at `level`, in manifest order.
    pub fn files_at(&self, level: u32) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.level == level)
            .map(|e| e.file_name.as_str())
            .collect()
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.entries.iter().any(|e| e.file_name == file_name)
    }

    /// Adds a table (does **not** save). A table is listed at most once.
    pub fn add(&mut self, file_name: String, level: u32) {
        self.entries.retain(|e| e.file_name != file_name);
        let pos = self
            .entries
            .iter()
            .position(|e| e.level >= level)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, TableMeta { file_name, level });
    }

    /// Drops every listed table named in `file_names` (does **not** save).
    pub fn remove_files(&mut self, file_names: &[&str]) {
        self.entries
            .retain(|e| !file_names.contains(&e.file_name.as_str()));
    }
}

/// `L<level>:<file>`
fn parse_line(line: &str) -> Result<TableMeta> {
    let Some((level_str, file_name)) = line.split_once(':') else {
        bail!("invalid format (expected 'L<n>:<file>'): {}", line);
    };
    let level = match level_str.strip_prefix('L').map(str::parse::<u32>) {
        Some(Ok(level)) if level >= 1 => level,
        _ => bail!("unknown level '{}'", level_str),
    };
    if file_name.is_empty() || file_name.contains('/') {
        bail!("invalid table file name '{}'", file_name);
    }
    Ok(TableMeta {
        file_name: file_name.to_string(),
        level,
    })
}
