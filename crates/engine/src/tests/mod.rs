
use crate::Engine;
use config::Config;
use std::fs;
use std::path::Path;

// -------------------- Shared helpers --------------------

/// Two generations of four keys, no fsync, no automatic compaction.
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::with_data_dir(dir);
    config.wal.sync = false;
    config.memtable.generations = 2;
    config.memtable.capacity = 4;
    config.compaction.level_file_trigger = 0;
    config.cache.capacity = 16;
    config
}

/// One generation of two keys: every second distinct key flushes.
pub(crate) fn flushy_config(dir: &Path) -> Config {
    let mut config = test_config(dir);
    config.memtable.generations = 1;
    config.memtable.capacity = 2;
    config
}

pub(crate) fn open(dir: &Path) -> anyhow::Result<Engine> {
    Engine::open(test_config(dir))
}

pub(crate) fn count_files(dir: &Path, matches: impl Fn(&str) -> bool) -> usize {
    fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_str().is_some_and(&matches))
                .count()
        })
        .unwrap_or(0)
}

pub(crate) fn table_files(dir: &Path) -> usize {
    count_files(dir, |n| n.starts_with("file_") && n.ends_with(".db"))
}

pub(crate) fn merkle_files(dir: &Path) -> usize {
    count_files(dir, |n| n.starts_with("merkle_") && n.ends_with(".txt"))
}

/// WAL bytes of one entry.
pub(crate) fn wal_len(key: &str, value: &str) -> u64 {
    (wal::HEADER_SIZE + key.len() + value.len()) as u64
}
