use super::{del, flush_and_open, keys_of, numbered, put, writer};
use crate::*;
use anyhow::{anyhow, Result};
use memtable::MemTableEntry;
use tempfile::tempdir;

fn ok_run(v: Vec<MemTableEntry>) -> impl Iterator<Item = Result<MemTableEntry>> {
    v.into_iter().map(Ok)
}

// -------------------- In-memory merge --------------------

#[test]
fn newer_timestamp_wins() {
    let merged = merge_runs(vec![put("a", "new", 5)], vec![put("a", "old", 1)]);
    assert_eq!(merged, vec![put("a", "new", 5)]);

    // The winner is decided by timestamp, not by side.
    let merged = merge_runs(vec![put("a", "old", 1)], vec![put("a", "new", 5)]);
    assert_eq!(merged, vec![put("a", "new", 5)]);
}

#[test]
fn equal_timestamps_go_to_the_newer_run() {
    let merged = merge_runs(vec![put("a", "A", 3)], vec![put("a", "B", 3)]);
    assert_eq!(merged, vec![put("a", "A", 3)]);
}

#[test]
fn disjoint_runs_interleave() {
    let a = vec![put("a", "1", 1), put("c", "3", 1), put("e", "5", 1)];
    let b = vec![put("b", "2", 1), put("d", "4", 1), put("f", "6", 1)];
    assert_eq!(keys_of(&merge_runs(a, b)), vec!["a", "b", "c", "d", "e", "f"]);
}

#[test]
fn one_side_empty() {
    let run = numbered(4, 1);
    assert_eq!(merge_runs(run.clone(), Vec::new()), run);
    assert_eq!(merge_runs(Vec::new(), run.clone()), run);
    assert!(merge_runs(Vec::new(), Vec::new()).is_empty());
}

#[test]
fn tombstones_pass_through() {
    let merged = merge_runs(vec![del("a", 9), put("b", "x", 1)], vec![put("a", "old", 2)]);
    assert_eq!(merged.len(), 2);
    assert!(merged[0].tombstone);
    assert_eq!(merged[0].timestamp, 9);
}

#[test]
fn stream_errors_propagate() {
    let a = vec![Ok(put("a", "1", 1)), Err(anyhow!("disk gone"))].into_iter();
    let b = ok_run(vec![put("b", "2", 1)]);
    let out: Vec<Result<MemTableEntry>> = TwoWayMerge::new(a, b).collect();
    assert!(out.iter().any(|r| r.is_err()));
}

// -------------------- Table merge --------------------

#[test]
fn merge_tables_keeps_newest_versions() -> Result<()> {
    let dir = tempdir()?;
    let (_, older) = flush_and_open(
        dir.path(),
        2,
        &[put("a", "old", 1), put("b", "keep", 1), del("c", 1)],
    )?;
    let (_, newer) = flush_and_open(dir.path(), 2, &[put("a", "new", 5), put("c", "back", 5)])?;

    let w = writer(dir.path(), 2);
    let out = merge_tables(&newer, &older, &w, 2, false)?.expect("non-empty output");
    assert_eq!(out.level, 2);

    let merged = SSTableReader::open(&out.path)?;
    assert_eq!(merged.query(b"a")?, Some(b"new".to_vec()));
    assert_eq!(merged.query(b"b")?, Some(b"keep".to_vec()));
    assert_eq!(merged.query(b"c")?, Some(b"back".to_vec()));
    merged.verify_integrity()?;

    // Inputs are left alone.
    assert_eq!(newer.query(b"a")?, Some(b"new".to_vec()));
    assert_eq!(older.query(b"a")?, Some(b"old".to_vec()));
    Ok(())
}

#[test]
fn merge_tables_tombstone_handling() -> Result<()> {
    let dir = tempdir()?;
    let (_, older) = flush_and_open(dir.path(), 2, &[put("a", "1", 1), put("b", "2", 1)])?;
    let (_, newer) = flush_and_open(dir.path(), 2, &[del("a", 4)])?;
    let w = writer(dir.path(), 2);

    let kept = merge_tables(&newer, &older, &w, 2, false)?.expect("output");
    let kept = SSTableReader::open(&kept.path)?;
    assert!(kept.get(b"a")?.is_some_and(|e| e.tombstone));

    let dropped = merge_tables(&newer, &older, &w, 2, true)?.expect("output");
    let dropped = SSTableReader::open(&dropped.path)?;
    assert!(dropped.get(b"a")?.is_none());
    assert_eq!(keys_of(&dropped.iter()?.collect::<Result<Vec<_>>>()?), vec!["b"]);
    Ok(())
}

#[test]
fn merge_of_only_tombstones_writes_nothing() -> Result<()> {
    let dir = tempdir()?;
    let (_, older) = flush_and_open(dir.path(), 2, &[del("a", 1)])?;
    let (_, newer) = flush_and_open(dir.path(), 2, &[del("b", 2)])?;
    let before = std::fs::read_dir(dir.path())?.count();

    let w = writer(dir.path(), 2);
    assert!(merge_tables(&newer, &older, &w, 2, true)?.is_none());
    assert_eq!(std::fs::read_dir(dir.path())?.count(), before);
    Ok(())
}

#[test]
fn merge_large_tables_stays_sorted() -> Result<()> {
    let dir = tempdir()?;
    let evens: Vec<_> = (0..200).step_by(2).map(|i| put(&format!("k{:04}", i), "e", 1)).collect();
    let odds: Vec<_> = (1..200).step_by(2).map(|i| put(&format!("k{:04}", i), "o", 2)).collect();
    let (_, a) = flush_and_open(dir.path(), 4, &evens)?;
    let (_, b) = flush_and_open(dir.path(), 4, &odds)?;

    let out = merge_tables(&b, &a, &writer(dir.path(), 4), 1, false)?.expect("output");
    let all: Vec<_> = SSTableReader::open(&out.path)?.iter()?.collect::<Result<_>>()?;
    assert_eq!(all.len(), 200);
    assert!(all.windows(2).all(|w| w[0].key < w[1].key));
    Ok(())
}
