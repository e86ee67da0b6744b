//! Published tables, grouped by level.
//!
//! Level 1 receives flushes; deeper levels receive compaction output. Inside
//! a level tables are kept newest first by creation timestamp, and a lookup
//! walks level 1 before level 2 and so on. Every change to the set goes
//! through the [`Manifest`] before the files it retires are deleted.

use anyhow::{Context, Result};
use memtable::MemTableEntry;
use sstable::{parse_table_file_name, SSTableReader, SSTableWriter, TableHandle};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::manifest::Manifest;

/// An open table.
#[derive(Debug, Clone)]
pub struct LiveTable {
    pub handle: TableHandle,
    pub reader: SSTableReader,
}

impl LiveTable {
    pub fn open(handle: TableHandle) -> Result<Self> {
        let reader = SSTableReader::open(&handle.path)
            .with_context(|| format!("opening table {}", handle.path.display()))?;
        Ok(Self { handle, reader })
    }
}

#[derive(Debug)]
pub(crate) struct TableSet {
    writer: SSTableWriter,
    manifest: Manifest,
    /// `levels[0]` is level 1. Newest first within a level.
    levels: Vec<Vec<LiveTable>>,
}

impl TableSet {
    /// Opens every table the manifest lists.
    ///
    /// Without a manifest the directory is scanned for table files and the
    /// listing bootstrapped from their names. With one, table files it does
    /// not list are leftovers of an interrupted flush or compaction and are
    /// deleted. Tables are matched by timestamp, so a table renamed to a new
    /// level just before a crash is still found.
    pub(crate) fn open(dir: &Path, writer: SSTableWriter, max_levels: u32) -> Result<Self> {
        let mut manifest = Manifest::load_or_create(dir)?;
        let on_disk = scan_table_files(dir)?;

        let survivors = if manifest.existed() {
            let listed: HashSet<u128> = manifest
                .entries
                .iter()
                .filter_map(|e| parse_table_file_name(&e.file_name))
                .map(|(ts, _)| ts)
                .collect();
            let present: HashSet<u128> = on_disk.iter().map(|h| h.timestamp).collect();
            for missing in listed.difference(&present) {
                warn!(timestamp = %missing, "manifest lists a missing table, dropping it");
            }
            let mut kept = Vec::with_capacity(on_disk.len());
            for handle in on_disk {
                if listed.contains(&handle.timestamp) {
                    kept.push(handle);
                } else {
                    warn!(path = %handle.path.display(), "removing table missing from manifest");
                    handle.remove()?;
                }
            }
            kept
        } else {
            if !on_disk.is_empty() {
                info!(tables = on_disk.len(), "bootstrapping manifest from directory");
            }
            on_disk
        };

        // Oldest first, so each level ends up newest first.
        let before = std::mem::take(&mut manifest.entries);
        for handle in survivors.iter().rev() {
            manifest.add(handle.file_name(), handle.level);
        }
        if !manifest.existed() || manifest.entries != before {
            manifest.save()?;
        }

        let mut set = Self {
            writer,
            manifest,
            levels: Vec::new(),
        };
        set.levels.resize_with(max_levels.max(1) as usize, Vec::new);
        for handle in survivors {
            set.insert(LiveTable::open(handle)?);
        }
        Ok(set)
    }

    pub(crate) fn writer(&self) -> &SSTableWriter {
        &self.writer
    }

    /// Number of levels tables may occupy.
    pub(crate) fn depth(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Tables at `level`, newest first.
    pub(crate) fn level(&self, level: u32) -> &[LiveTable] {
        level
            .checked_sub(1)
            .and_then(|i| self.levels.get(i as usize))
            .map_or(&[], Vec::as_slice)
    }

    /// Every table in lookup order: level 1 newest first, then level 2, ...
    pub(crate) fn newest_first(&self) -> impl Iterator<Item = &LiveTable> {
        self.levels.iter().flatten()
    }

    pub(crate) fn find(&self, handle: &TableHandle) -> Option<&LiveTable> {
        self.level(handle.level).iter().find(|t| t.handle == *handle)
    }

    pub(crate) fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub(crate) fn counts(&self) -> Vec<usize> {
        self.levels.iter().map(Vec::len).collect()
    }

    /// Tables at `level` or deeper, apart from `except`.
    pub(crate) fn count_from(&self, level: u32, except: &[&TableHandle]) -> usize {
        (level..=self.depth())
            .flat_map(|l| self.level(l))
            .filter(|t| !except.contains(&&t.handle))
            .count()
    }

    /// Writes a sorted run as a new table at `level` and lists it.
    pub(crate) fn publish(&mut self, entries: &[MemTableEntry], level: u32) -> Result<TableHandle> {
        let handle = self.writer.flush(entries, level)?;
        self.install(handle.clone())?;
        self.manifest.save()?;
        info!(path = %handle.path.display(), entries = entries.len(), level, "flushed memtable");
        Ok(handle)
    }

    /// Opens `handle` and lists it (does **not** save the manifest).
    pub(crate) fn install(&mut self, handle: TableHandle) -> Result<()> {
        let table = LiveTable::open(handle)?;
        self.manifest.add(table.handle.file_name(), table.handle.level);
        self.insert(table);
        Ok(())
    }

    /// Unlists `handles` (does **not** save the manifest or delete files).
    pub(crate) fn retire(&mut self, handles: &[&TableHandle]) {
        let names: Vec<String> = handles.iter().map(|h| h.file_name()).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        self.manifest.remove_files(&names);
        for level in &mut self.levels {
            level.retain(|t| !handles.contains(&&t.handle));
        }
    }

    pub(crate) fn save_manifest(&mut self) -> Result<()> {
        self.manifest.save()
    }

    fn insert(&mut self, table: LiveTable) {
        let idx = table.handle.level.max(1) as usize - 1;
        if idx >= self.levels.len() {
            self.levels.resize_with(idx + 1, Vec::new);
        }
        let level = &mut self.levels[idx];
        let pos = level
            .iter()
            .position(|t| t.handle.timestamp < table.handle.timestamp)
            .unwrap_or(level.len());
        level.insert(pos, table);
    }
}

/// Table files in `dir`, by name.
fn scan_table_files(dir: &Path) -> Result<Vec<TableHandle>> {
    let mut handles: Vec<TableHandle> = std::fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|e| e.ok())
        .filter_map(|e| TableHandle::from_path(e.path()))
        .filter(|h| h.level >= 1)
        .collect();
    handles.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(handles)
}
