use super::{del, flush_and_open, numbered, put, writer};
use crate::*;
use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use tempfile::tempdir;

fn dir_entries(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// -------------------- Rejections --------------------

#[test]
fn empty_run_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let result = writer(dir.path(), 2).flush(&[], 1);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("empty"));
    assert!(dir_entries(dir.path()).is_empty(), "no file may be left behind");
    Ok(())
}

#[test]
fn empty_stream_writes_nothing() -> Result<()> {
    let dir = tempdir()?;
    let out = writer(dir.path(), 2).write_stream(std::iter::empty(), 1)?;
    assert!(out.is_none());
    assert!(dir_entries(dir.path()).is_empty());
    Ok(())
}

#[test]
fn unsorted_run_is_rejected_and_cleaned_up() -> Result<()> {
    let dir = tempdir()?;
    let run = vec![put("b", "1", 1), put("a", "2", 1)];
    assert!(writer(dir.path(), 2).flush(&run, 1).is_err());
    assert!(dir_entries(dir.path()).is_empty());

    let dup = vec![put("a", "1", 1), put("a", "2", 1)];
    assert!(writer(dir.path(), 2).flush(&dup, 1).is_err());
    Ok(())
}

#[test]
fn stream_error_aborts_the_write() -> Result<()> {
    let dir = tempdir()?;
    let items = vec![Ok(put("a", "1", 1)), Err(anyhow::anyhow!("source failed"))];
    assert!(writer(dir.path(), 2).write_stream(items.into_iter(), 1).is_err());
    assert!(dir_entries(dir.path()).is_empty());
    Ok(())
}

// -------------------- Layout --------------------

#[test]
fn header_locates_every_zone() -> Result<()> {
    let dir = tempdir()?;
    let run = vec![put("a", "apple", 1), put("b", "banana", 2), del("c", 3)];
    let (handle, _) = flush_and_open(dir.path(), 2, &run)?;

    let mut f = File::open(&handle.path)?;
    let file_len = f.metadata()?.len();
    let f0 = f.read_u64::<LittleEndian>()?;
    let f1 = f.read_u64::<LittleEndian>()?;
    let f2 = f.read_u64::<LittleEndian>()?;
    let f3 = f.read_u64::<LittleEndian>()?;

    let data_size: u64 = run.iter().map(record_len).sum();
    assert_eq!(f0, data_size + 32);

    // Index leaders: records 0 and 2.
    let index_size = (8 + 1 + 8) * 2;
    assert_eq!(f1, index_size + 32);

    // The first summary record sits at f0 + f1 - 32 and points at the first index record.
    let summary_start = f0 + f1 - 32;
    f.seek(SeekFrom::Start(summary_start))?;
    let (key, offset) = read_pointer(&mut f)?;
    assert_eq!(key, b"a");
    assert_eq!(offset, f0);
    assert_eq!(f.stream_position()?, f2, "one summary leader for two index records");

    // The first index record points at the first data record.
    f.seek(SeekFrom::Start(f0))?;
    assert_eq!(read_pointer(&mut f)?, (b"a".to_vec(), 32));
    let (key, offset) = read_pointer(&mut f)?;
    assert_eq!(key, b"c");
    f.seek(SeekFrom::Start(offset))?;
    assert!(read_record(&mut f)?.tombstone);

    // Bloom zone: M, then exactly f3 bytes of bits, then seeds to EOF.
    f.seek(SeekFrom::Start(f2))?;
    let m = f.read_u64::<LittleEndian>()?;
    assert_eq!(f3, m.div_ceil(8));
    let mut rest = Vec::new();
    f.seek(SeekFrom::Start(f2 + 8 + f3))?;
    f.read_to_end(&mut rest)?;
    assert!(!rest.is_empty() && rest.len() % 16 == 0, "8-byte length + 8-byte seed records");
    assert!(f2 + 8 + f3 < file_len);
    Ok(())
}

#[test]
fn data_records_follow_the_header() -> Result<()> {
    let dir = tempdir()?;
    let (handle, _) = flush_and_open(dir.path(), 2, &[put("k", "v", 77)])?;
    let mut f = File::open(&handle.path)?;
    f.seek(SeekFrom::Start(32))?;
    assert_eq!(f.read_u64::<LittleEndian>()?, 1); // key size
    assert_eq!(f.read_u64::<LittleEndian>()?, 1); // value size
    assert_eq!(f.read_u64::<LittleEndian>()?, 77);
    assert_eq!(f.read_u8()?, 0);
    let mut kv = [0u8; 2];
    f.read_exact(&mut kv)?;
    assert_eq!(&kv, b"kv");
    Ok(())
}

#[test]
fn leader_counts_follow_block_size() -> Result<()> {
    let dir = tempdir()?;
    for block in [1usize, 2, 3, 5] {
        let run = numbered(20, 1);
        let (_, reader) = flush_and_open(dir.path(), block, &run)?;
        let h = *reader.header();
        let index_records = (h.summary_start() - h.index_start()) / (8 + 6 + 8);
        let summary_records = (h.bloom_start - h.summary_start()) / (8 + 6 + 8);
        assert_eq!(index_records as usize, 20usize.div_ceil(block), "block {}", block);
        assert_eq!(
            summary_records as usize,
            20usize.div_ceil(block).div_ceil(block),
            "block {}",
            block
        );
    }
    Ok(())
}

// -------------------- Naming & artifacts --------------------

#[test]
fn names_carry_timestamp_and_level() -> Result<()> {
    let dir = tempdir()?;
    let w = writer(dir.path(), 2);
    let a = w.flush(&[put("a", "1", 1)], 1)?;
    let b = w.flush(&[put("a", "1", 1)], 3)?;

    assert_ne!(a.timestamp, b.timestamp);
    assert!(b.timestamp > a.timestamp);
    assert_eq!(b.level, 3);
    assert_eq!(
        b.path.file_name().unwrap().to_string_lossy(),
        format!("file_{}_3.db", b.timestamp)
    );
    assert_eq!(TableHandle::from_path(&b.path), Some(b.clone()));
    Ok(())
}

#[test]
fn merkle_artifact_matches_flushed_blobs() -> Result<()> {
    let dir = tempdir()?;
    let run = vec![put("a", "1", 1), del("b", 2), put("c", "3", 3)];
    let (handle, _) = flush_and_open(dir.path(), 2, &run)?;

    let merkle_path = handle.merkle_path();
    assert!(merkle_path.ends_with(format!("merkle_{}.txt", handle.timestamp)));
    let expected = merkle::MerkleTree::build([b"a1".as_slice(), b"b".as_slice(), b"c3".as_slice()]);
    assert_eq!(merkle::read_root(&merkle_path)?, expected.root());

    let names = dir_entries(dir.path());
    assert_eq!(names.len(), 2, "table and artifact only: {:?}", names);
    Ok(())
}

#[test]
fn promote_and_remove() -> Result<()> {
    let dir = tempdir()?;
    let (handle, _) = flush_and_open(dir.path(), 2, &[put("a", "1", 1)])?;
    let moved = handle.promote(2)?;
    assert!(!handle.path.exists());
    assert!(moved.path.exists());
    assert_eq!(moved.merkle_path(), handle.merkle_path());
    SSTableReader::open(&moved.path)?.verify_integrity()?;

    moved.remove()?;
    assert!(dir_entries(dir.path()).is_empty());
    Ok(())
}

#[test]
fn parse_rejects_foreign_names() {
    assert_eq!(parse_table_file_name("file_12_3.db"), Some((12, 3)));
    assert_eq!(parse_table_file_name("file_12.db"), None);
    assert_eq!(parse_table_file_name("merkle_12.txt"), None);
    assert_eq!(parse_table_file_name("file_x_1.db"), None);
}
