use config::Config;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engine::Engine;
use tempfile::tempdir;

const N_KEYS: usize = 2_000;

fn bench_config(dir: &std::path::Path) -> Config {
    let mut config = Config::with_data_dir(dir);
    config.wal.sync = false;
    config.memtable.capacity = 256;
    config
}

fn engine_put_benchmark(c: &mut Criterion) {
    c.bench_function("engine_put_2k", |b| {
        b.iter_batched(
            || tempdir().unwrap(),
            |dir| {
                let mut engine = Engine::open(bench_config(dir.path())).unwrap();
                for i in 0..N_KEYS {
                    engine
                        .put(format!("key{:05}", i).as_bytes(), &[b'v'; 100])
                        .unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn engine_get_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(bench_config(dir.path())).unwrap();
    for i in 0..N_KEYS {
        engine
            .put(format!("key{:05}", i).as_bytes(), &[b'v'; 100])
            .unwrap();
    }
    engine.force_flush().unwrap();

    c.bench_function("engine_get_2k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                assert!(engine
                    .get(format!("key{:05}", i).as_bytes())
                    .unwrap()
                    .is_some());
            }
        });
    });
}

fn engine_prefix_scan_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let mut engine = Engine::open(bench_config(dir.path())).unwrap();
    for i in 0..N_KEYS {
        engine
            .put(format!("key{:05}", i).as_bytes(), &[b'v'; 100])
            .unwrap();
    }
    engine.force_flush().unwrap();

    c.bench_function("engine_prefix_scan_page", |b| {
        b.iter(|| engine.prefix_scan(b"key01", 2, 50).unwrap());
    });
}

criterion_group!(
    benches,
    engine_put_benchmark,
    engine_get_benchmark,
    engine_prefix_scan_benchmark
);
criterion_main!(benches);
