use config::StructureType;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use memtable::{MemTableEntry, MemTableManager};

const N_KEYS: u64 = 10_000;

fn fill(structure: StructureType) -> MemTableManager {
    let mut mgr = MemTableManager::new(structure, 4, 1_000);
    for i in 0..N_KEYS {
        let entry = MemTableEntry::put(format!("key{}", i).into_bytes(), vec![b'x'; 100], i);
        if let Some(batch) = mgr.add(entry, 0) {
            mgr.release(&batch);
        }
    }
    mgr
}

const STRUCTURES: [StructureType; 3] = [
    StructureType::HashMap,
    StructureType::SkipList,
    StructureType::BTree,
];

fn memtable_add_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("memtable_add_10k");
    for structure in STRUCTURES {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", structure)),
            &structure,
            |b, &s| b.iter(|| fill(s)),
        );
    }
    group.finish();
}

fn memtable_find_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("memtable_find");
    for structure in STRUCTURES {
        let mgr = fill(structure);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", structure)),
            &mgr,
            |b, mgr| {
                b.iter(|| {
                    for i in (N_KEYS - 1_000)..N_KEYS {
                        assert!(mgr.find(format!("key{}", i).as_bytes()).is_some());
                    }
                })
            },
        );
    }
    group.finish();
}

fn memtable_sort_benchmark(c: &mut Criterion) {
    let mgr = fill(StructureType::SkipList);
    c.bench_function("memtable_sort_skiplist", |b| b.iter(|| mgr.sort()));
}

criterion_group!(
    benches,
    memtable_add_benchmark,
    memtable_find_benchmark,
    memtable_sort_benchmark
);
criterion_main!(benches);
