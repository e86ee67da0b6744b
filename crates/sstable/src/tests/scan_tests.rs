use super::{del, flush_and_open, put};
use crate::*;
use anyhow::{anyhow, Result};
use memtable::MemTableEntry;
use tempfile::tempdir;

fn source<'a>(v: Vec<MemTableEntry>) -> EntrySource<'a> {
    Box::new(v.into_iter().map(Ok))
}

fn strings(keys: Vec<Vec<u8>>) -> Vec<String> {
    keys.into_iter().map(|k| String::from_utf8_lossy(&k).into_owned()).collect()
}

// -------------------- MergedScan --------------------

#[test]
fn merged_scan_yields_one_winner_per_key() -> Result<()> {
    let newest = vec![put("b", "b-new", 3), put("d", "d", 3)];
    let oldest = vec![put("a", "a", 1), put("b", "b-old", 1), put("c", "c", 1)];
    let out: Vec<_> = MergedScan::new(vec![source(newest), source(oldest)])?.collect::<Result<_>>()?;

    let pairs: Vec<(&[u8], &[u8])> = out.iter().map(|e| (e.key.as_slice(), e.value.as_slice())).collect();
    assert_eq!(
        pairs,
        vec![
            (b"a".as_slice(), b"a".as_slice()),
            (b"b".as_slice(), b"b-new".as_slice()),
            (b"c".as_slice(), b"c".as_slice()),
            (b"d".as_slice(), b"d".as_slice()),
        ]
    );
    Ok(())
}

#[test]
fn timestamp_beats_source_rank() -> Result<()> {
    // An older source can still hold the newer record.
    let out: Vec<_> = MergedScan::new(vec![source(vec![put("k", "stale", 1)]), source(vec![put("k", "fresh", 8)])])?
        .collect::<Result<_>>()?;
    assert_eq!(out, vec![put("k", "fresh", 8)]);
    Ok(())
}

#[test]
fn equal_timestamps_favour_lower_source_index() -> Result<()> {
    let sources = vec![
        source(vec![put("k", "s0", 4)]),
        source(vec![put("k", "s1", 4)]),
        source(vec![put("k", "s2", 4)]),
    ];
    let out: Vec<_> = MergedScan::new(sources)?.collect::<Result<_>>()?;
    assert_eq!(out, vec![put("k", "s0", 4)]);
    Ok(())
}

#[test]
fn live_skips_tombstoned_winners() -> Result<()> {
    let sources = vec![
        source(vec![del("a", 5), put("c", "c", 5)]),
        source(vec![put("a", "a", 1), put("b", "b", 1)]),
    ];
    let keys: Vec<_> = MergedScan::new(sources)?
        .live()
        .map(|r| r.map(|e| e.key))
        .collect::<Result<_>>()?;
    assert_eq!(strings(keys), vec!["b", "c"]);
    Ok(())
}

#[test]
fn source_errors_surface() {
    let bad: EntrySource<'_> = Box::new(vec![Ok(put("a", "1", 1)), Err(anyhow!("boom"))].into_iter());
    let scan = MergedScan::new(vec![bad, source(vec![put("b", "2", 1)])]);
    let items: Vec<Result<MemTableEntry>> = match scan {
        Ok(s) => s.collect(),
        Err(e) => vec![Err(e)],
    };
    assert!(items.iter().any(|r| r.is_err()));
}

// -------------------- Pagination --------------------

#[test]
fn paginate_windows() -> Result<()> {
    let items = || (1..=7).map(Ok::<i32, anyhow::Error>);
    assert_eq!(paginate(items(), 1, 3)?, vec![1, 2, 3]);
    assert_eq!(paginate(items(), 2, 3)?, vec![4, 5, 6]);
    assert_eq!(paginate(items(), 3, 3)?, vec![7]);
    assert!(paginate(items(), 4, 3)?.is_empty());
    assert_eq!(paginate(items(), 0, 3)?, vec![1, 2, 3]);
    assert!(paginate(items(), 1, 0)?.is_empty());
    Ok(())
}

#[test]
fn paginate_reports_errors_in_skipped_window() {
    let items = vec![Ok(1), Err(anyhow!("bad record")), Ok(3), Ok(4)].into_iter();
    assert!(paginate(items, 2, 2).is_err());
}

// -------------------- Multi-file prefix scan --------------------

#[test]
fn prefix_scan_over_one_table() -> Result<()> {
    let dir = tempdir()?;
    let (_, r) = flush_and_open(dir.path(), 2, &[put("k1", "a", 1), put("k2", "b", 1), put("x1", "c", 1)])?;
    let keys = multi_file_prefix_scan(&[r], b"k", 1, 10)?;
    assert_eq!(strings(keys), vec!["k1", "k2"]);
    Ok(())
}

#[test]
fn prefix_scan_over_many_tables() -> Result<()> {
    let dir = tempdir()?;
    let (_, old) = flush_and_open(
        dir.path(),
        2,
        &[put("user:1", "a", 1), put("user:2", "b", 1), put("user:3", "c", 1)],
    )?;
    let (_, new) = flush_and_open(dir.path(), 2, &[del("user:2", 5), put("user:4", "d", 5)])?;

    let readers = vec![new, old];
    let keys = multi_file_prefix_scan(&readers, b"user:", 1, 10)?;
    assert_eq!(strings(keys), vec!["user:1", "user:3", "user:4"]);

    let page2 = multi_file_prefix_scan(&readers, b"user:", 2, 2)?;
    assert_eq!(strings(page2), vec!["user:4"]);

    assert!(multi_file_prefix_scan(&readers, b"order:", 1, 10)?.is_empty());
    Ok(())
}
