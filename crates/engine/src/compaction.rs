//! Compaction: size-tiered and leveled policies, both built from repeated
//! [`Engine::compact_pair`] calls.
//!
//! A pair merge streams the two inputs through [`merge_tables`], lists the
//! output in the manifest, and only then deletes the inputs. Tombstones are
//! dropped only when no table other than the two inputs remains at or below
//! the target level, since there is then nothing older left for them to
//! shadow.
use anyhow::{Context, Result};
use config::CompactionAlgorithm;
use sstable::{merge_tables, TableHandle};
use tracing::{debug, info};

use crate::Engine;

impl Engine {
    /// Runs the configured policy over every level that reached its
    /// trigger. A trigger of 0 disables automatic compaction.
    pub(crate) fn maybe_compact(&mut self) -> Result<()> {
        let trigger = self.config.compaction.level_file_trigger;
        if trigger == 0 {
            return Ok(());
        }
        let depth = self.tables.depth();
        for level in 1..=depth {
            match self.config.compaction.algorithm {
                CompactionAlgorithm::SizeTiered => {
                    // In place needs at least two tables to merge.
                    let needed = if level == depth { trigger.max(2) } else { trigger };
                    if self.tables.level(level).len() >= needed {
                        self.size_tiered(level)?;
                    }
                }
                CompactionAlgorithm::Leveled => {
                    if level == depth {
                        continue;
                    }
                    let limit = self.leveled_limit(level);
                    while self.tables.level(level).len() > limit {
                        self.push_down_oldest(level)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Compacts with the configured algorithm, regardless of triggers.
    pub fn compact(&mut self) -> Result<()> {
        self.compact_with(self.config.compaction.algorithm, None)
    }

    /// Compacts `level` (or every level, shallowest first) with `algorithm`,
    /// regardless of triggers.
    ///
    /// Size-tiered folds all tables of a level into one table at the next
    /// level (the deepest level merges in place). Leveled pushes each table
    /// of a level down into the next one.
    pub fn compact_with(&mut self, algorithm: CompactionAlgorithm, level: Option<u32>) -> Result<()> {
        let depth = self.tables.depth();
        let levels = match level {
            Some(l) => {
                anyhow::ensure!(l >= 1 && l <= depth, "level {} out of range 1..={}", l, depth);
                l..=l
            }
            None => 1..=depth,
        };
        for level in levels {
            match algorithm {
                CompactionAlgorithm::SizeTiered => self.size_tiered(level)?,
                CompactionAlgorithm::Leveled => {
                    if level < depth {
                        while !self.tables.level(level).is_empty() {
                            self.push_down_oldest(level)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Leveled trigger: `level_file_trigger * scaling_factor^(level - 1)`.
    fn leveled_limit(&self, level: u32) -> usize {
        let c = &self.config.compaction;
        let growth = c.scaling_factor.saturating_pow(level.saturating_sub(1));
        c.level_file_trigger.saturating_mul(growth)
    }

    /// Folds every table of `level`, oldest first, into one table at the
    /// next level (or in place at the deepest level).
    fn size_tiered(&mut self, level: u32) -> Result<()> {
        let target = (level + 1).min(self.tables.depth());
        let mut files: Vec<TableHandle> = self
            .tables
            .level(level)
            .iter()
            .map(|t| t.handle.clone())
            .collect();
        files.reverse();
        if files.is_empty() || (target == level && files.len() < 2) {
            return Ok(());
        }
        info!(level, target, tables = files.len(), "size-tiered compaction");

        let mut acc: Option<TableHandle> = None;
        for newer in files {
            acc = match acc {
                None => Some(newer),
                Some(older) => self.compact_pair(&newer, &older, target)?,
            };
        }
        if let Some(last) = acc.filter(|h| h.level != target) {
            self.promote(&last, target)?;
        }
        Ok(())
    }

    /// Moves the oldest table of `level` into `level + 1`, merging it with
    /// every table there whose key range overlaps its own.
    fn push_down_oldest(&mut self, level: u32) -> Result<()> {
        let target = level + 1;
        let Some(oldest) = self.tables.level(level).last() else {
            return Ok(());
        };
        let handle = oldest.handle.clone();
        let (first, last) = oldest.reader.key_range()?;

        let mut overlapping = Vec::new();
        for t in self.tables.level(target) {
            let (lo, hi) = t.reader.key_range()?;
            if lo <= last && first <= hi {
                overlapping.push(t.handle.clone());
            }
        }
        info!(level, target, overlapping = overlapping.len(), "leveled compaction");

        // Newest first, so the accumulated run is always the newer input.
        let mut acc = Some(handle);
        for older in overlapping {
            acc = match acc {
                None => Some(older),
                Some(newer) => self.compact_pair(&newer, &older, target)?,
            };
        }
        if let Some(h) = acc.filter(|h| h.level != target) {
            self.promote(&h, target)?;
        }
        Ok(())
    }

    /// Merges `newer` with `older` into a new table at `target`, then
    /// retires both inputs. Returns `None` when nothing survived.
    pub(crate) fn compact_pair(
        &mut self,
        newer: &TableHandle,
        older: &TableHandle,
        target: u32,
    ) -> Result<Option<TableHandle>> {
        let drop_tombstones = self.tables.count_from(target, &[newer, older]) == 0;
        let merged = {
            let a = self
                .tables
                .find(newer)
                .with_context(|| format!("{} is not a live table", newer.path.display()))?;
            let b = self
                .tables
                .find(older)
                .with_context(|| format!("{} is not a live table", older.path.display()))?;
            merge_tables(&a.reader, &b.reader, self.tables.writer(), target, drop_tombstones)?
        };

        if let Some(out) = &merged {
            self.tables.install(out.clone())?;
        }
        self.tables.retire(&[newer, older]);
        self.tables.save_manifest()?;
        newer.remove()?;
        older.remove()?;
        self.compactions += 1;

        debug!(
            newer = %newer.path.display(),
            older = %older.path.display(),
            output = ?merged.as_ref().map(|h| h.path.display().to_string()),
            drop_tombstones,
            "compacted pair"
        );
        Ok(merged)
    }

    /// Renames a table into `target` without rewriting it.
    fn promote(&mut self, handle: &TableHandle, target: u32) -> Result<()> {
        self.tables.retire(&[handle]);
        let moved = handle.promote(target)?;
        self.tables.install(moved.clone())?;
        self.tables.save_manifest()?;
        info!(path = %moved.path.display(), target, "promoted table");
        Ok(())
    }
}
