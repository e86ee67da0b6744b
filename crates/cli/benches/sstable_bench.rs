use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use memtable::MemTableEntry;
use sstable::{SSTableReader, SSTableWriter, WriterOptions};
use tempfile::tempdir;

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn build_run() -> Vec<MemTableEntry> {
    let mut entries: Vec<MemTableEntry> = (0..N_KEYS)
        .map(|i| MemTableEntry::put(format!("key{}", i).into_bytes(), vec![b'x'; VALUE_SIZE], 1))
        .collect();
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    entries
}

fn sstable_write_benchmark(c: &mut Criterion) {
    c.bench_function("sstable_write_10k", |b| {
        b.iter_batched(
            || (tempdir().unwrap(), build_run()),
            |(dir, entries)| {
                let writer = SSTableWriter::new(dir.path(), WriterOptions::default());
                writer.flush(&entries, 1).unwrap();
            },
            BatchSize::SmallInput,
        );
    });
}

fn open_table() -> (tempfile::TempDir, SSTableReader) {
    let dir = tempdir().unwrap();
    let writer = SSTableWriter::new(dir.path(), WriterOptions::default());
    let handle = writer.flush(&build_run(), 1).unwrap();
    let reader = SSTableReader::open(&handle.path).unwrap();
    (dir, reader)
}

fn sstable_get_hit_benchmark(c: &mut Criterion) {
    let (_dir, reader) = open_table();
    c.bench_function("sstable_get_hit_10k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                let key = format!("key{}", i).into_bytes();
                assert!(reader.get(&key).unwrap().is_some());
            }
        });
    });
}

fn sstable_get_miss_benchmark(c: &mut Criterion) {
    let (_dir, reader) = open_table();
    c.bench_function("sstable_get_miss_10k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                let key = format!("missing{}", i).into_bytes();
                assert!(reader.get(&key).unwrap().is_none());
            }
        });
    });
}

criterion_group!(
    benches,
    sstable_write_benchmark,
    sstable_get_hit_benchmark,
    sstable_get_miss_benchmark
);
criterion_main!(benches);
