use super::{del, flush_and_open, keys_of, numbered, put};
use crate::*;
use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use tempfile::tempdir;

// -------------------- Point lookups --------------------

#[test]
fn query_returns_present_values_only() -> Result<()> {
    let dir = tempdir()?;
    let (_, reader) = flush_and_open(dir.path(), 2, &[put("a", "1", 1), put("b", "2", 1)])?;
    assert_eq!(reader.query(b"a")?, Some(b"1".to_vec()));
    assert_eq!(reader.query(b"b")?, Some(b"2".to_vec()));
    assert_eq!(reader.query(b"c")?, None);
    assert_eq!(reader.query(b"0")?, None);
    Ok(())
}

#[test]
fn tombstone_is_found_but_shadows() -> Result<()> {
    let dir = tempdir()?;
    let (_, reader) = flush_and_open(dir.path(), 2, &[del("a", 5), put("b", "2", 1)])?;

    let rec = reader.get(b"a")?.expect("tombstone record is stored");
    assert!(rec.tombstone);
    assert_eq!(rec.timestamp, 5);
    assert_eq!(reader.query(b"a")?, None);
    Ok(())
}

#[test]
fn every_key_found_for_any_block_size() -> Result<()> {
    let dir = tempdir()?;
    let run = numbered(50, 9);
    for block in [1usize, 2, 3, 7, 64] {
        let (_, reader) = flush_and_open(dir.path(), block, &run)?;
        for e in &run {
            let got = reader.get(&e.key)?.expect("present key");
            assert_eq!(got, *e, "block {}", block);
        }
        for missing in ["key0005", "key050", "kez", "a", "key", "zzz"] {
            assert!(reader.get(missing.as_bytes())?.is_none(), "{} / block {}", missing, block);
        }
    }
    Ok(())
}

#[test]
fn empty_and_large_values() -> Result<()> {
    let dir = tempdir()?;
    let big = vec![b'x'; 1 << 20];
    let run = vec![
        put("empty", "", 1),
        memtable::MemTableEntry::put(b"large".to_vec(), big.clone(), 1),
    ];
    let (_, reader) = flush_and_open(dir.path(), 2, &run)?;
    assert_eq!(reader.query(b"empty")?, Some(Vec::new()));
    assert_eq!(reader.query(b"large")?, Some(big));
    Ok(())
}

#[test]
fn bloom_has_no_false_negatives() -> Result<()> {
    let dir = tempdir()?;
    let run = numbered(300, 1);
    let (_, reader) = flush_and_open(dir.path(), 2, &run)?;
    assert!(run.iter().all(|e| reader.bloom().may_contain(&e.key)));
    Ok(())
}

// -------------------- Scans --------------------

#[test]
fn prefix_scan_returns_matching_keys_in_order() -> Result<()> {
    let dir = tempdir()?;
    let run = vec![put("k1", "a", 1), put("k2", "b", 1), put("x1", "c", 1)];
    let (_, reader) = flush_and_open(dir.path(), 2, &run)?;
    assert_eq!(keys_of(&reader.prefix_scan(b"k")?), vec!["k1", "k2"]);
    assert_eq!(keys_of(&reader.prefix_scan(b"x")?), vec!["x1"]);
    assert!(reader.prefix_scan(b"a")?.is_empty());
    assert!(reader.prefix_scan(b"z")?.is_empty());
    assert_eq!(reader.prefix_scan(b"")?.len(), 3);
    Ok(())
}

#[test]
fn prefix_scan_runs_past_the_located_bracket() -> Result<()> {
    let dir = tempdir()?;
    let (_, reader) = flush_and_open(dir.path(), 2, &numbered(50, 1))?;
    let hits = keys_of(&reader.prefix_scan(b"key01")?);
    let expected: Vec<String> = (10..20).map(|i| format!("key{:03}", i)).collect();
    assert_eq!(hits, expected);
    Ok(())
}

#[test]
fn range_scan_is_inclusive() -> Result<()> {
    let dir = tempdir()?;
    let (_, reader) = flush_and_open(dir.path(), 3, &numbered(50, 1))?;
    let hits = keys_of(&reader.range_scan(b"key005", b"key012")?);
    assert_eq!(hits.len(), 8);
    assert_eq!(hits.first().map(String::as_str), Some("key005"));
    assert_eq!(hits.last().map(String::as_str), Some("key012"));

    // Bounds that are not stored keys.
    let hits = keys_of(&reader.range_scan(b"key0045", b"key0065")?);
    assert_eq!(hits, vec!["key005", "key006"]);

    assert!(reader.range_scan(b"key012", b"key005")?.is_empty());
    assert!(reader.range_scan(b"zz", b"zzz")?.is_empty());
    assert_eq!(reader.range_scan(b"", b"zzz")?.len(), 50);
    Ok(())
}

#[test]
fn scans_include_tombstones() -> Result<()> {
    let dir = tempdir()?;
    let run = vec![put("k1", "a", 1), del("k2", 2), put("k3", "c", 1)];
    let (_, reader) = flush_and_open(dir.path(), 2, &run)?;
    let hits = reader.prefix_scan(b"k")?;
    assert_eq!(hits.len(), 3);
    assert!(hits[1].tombstone);
    Ok(())
}

#[test]
fn iter_and_key_range() -> Result<()> {
    let dir = tempdir()?;
    for n in [1usize, 2, 7, 50] {
        let run = numbered(n, 3);
        let (_, reader) = flush_and_open(dir.path(), 2, &run)?;
        let all: Vec<_> = reader.iter()?.collect::<Result<_>>()?;
        assert_eq!(all, run);
        let (first, last) = reader.key_range()?;
        assert_eq!(first, run[0].key);
        assert_eq!(last, run[n - 1].key);
    }
    Ok(())
}

#[test]
fn readers_share_across_threads() -> Result<()> {
    let dir = tempdir()?;
    let run = numbered(100, 1);
    let (_, reader) = flush_and_open(dir.path(), 2, &run)?;
    std::thread::scope(|s| {
        for t in 0..4 {
            let reader = &reader;
            let run = &run;
            s.spawn(move || {
                for e in run.iter().skip(t).step_by(4) {
                    assert_eq!(reader.get(&e.key).unwrap().as_ref(), Some(e));
                }
            });
        }
    });
    Ok(())
}

// -------------------- Integrity --------------------

#[test]
fn verify_integrity_detects_modified_data() -> Result<()> {
    let dir = tempdir()?;
    let run = vec![put("a", "apple", 1), put("b", "banana", 1)];
    let (handle, reader) = flush_and_open(dir.path(), 2, &run)?;
    reader.verify_integrity()?;

    // Overwrite the last byte of the first value ("apple" -> "applf").
    let offset = 32 + RECORD_HEADER_SIZE + 1 + 4;
    let mut f = OpenOptions::new().write(true).open(&handle.path)?;
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(b"f")?;
    drop(f);

    let err = reader.verify_integrity().unwrap_err();
    assert!(err.to_string().contains("mismatch"), "{}", err);
    Ok(())
}

#[test]
fn verify_integrity_needs_the_artifact() -> Result<()> {
    let dir = tempdir()?;
    let (handle, reader) = flush_and_open(dir.path(), 2, &[put("a", "1", 1)])?;
    fs::remove_file(handle.merkle_path())?;
    assert!(reader.verify_integrity().is_err());
    Ok(())
}

// -------------------- Malformed files --------------------

#[test]
fn open_rejects_short_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("file_1_1.db");
    fs::write(&path, [0u8; 10])?;
    assert!(SSTableReader::open(&path).is_err());
    Ok(())
}

#[test]
fn open_rejects_inconsistent_header() -> Result<()> {
    let dir = tempdir()?;
    let (handle, _) = flush_and_open(dir.path(), 2, &numbered(5, 1))?;
    let mut f = OpenOptions::new().write(true).open(&handle.path)?;
    f.write_all(&u64::MAX.to_le_bytes())?;
    drop(f);
    assert!(SSTableReader::open(&handle.path).is_err());
    Ok(())
}

#[test]
fn corrupt_record_is_an_error_not_a_miss() -> Result<()> {
    let dir = tempdir()?;
    let (handle, reader) = flush_and_open(dir.path(), 2, &numbered(5, 1))?;
    // Tombstone byte of the first record.
    let mut f = OpenOptions::new().write(true).open(&handle.path)?;
    f.seek(SeekFrom::Start(32 + 24))?;
    f.write_all(&[7])?;
    drop(f);

    assert!(reader.get(b"key000").is_err());
    assert!(reader.iter()?.collect::<Result<Vec<_>>>().is_err());
    Ok(())
}

#[test]
fn missing_file_is_an_error() -> Result<()> {
    let dir = tempdir()?;
    let (handle, reader) = flush_and_open(dir.path(), 2, &numbered(3, 1))?;
    fs::remove_file(&handle.path)?;
    assert!(reader.get(b"key001").is_err());
    Ok(())
}
