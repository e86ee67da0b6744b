//! # CLI - Interactive Shell
//!
//! A REPL over the storage engine. Reads one command per line from stdin,
//! executes it and prints the result to stdout. Works interactively or with
//! commands piped in.
//!
//! ## Commands
//!
//! ```text
//! PUT key value                    Insert or update (alias SET)
//! GET key                          Print the value or "(nil)"
//! DELETE key                       Write a tombstone (alias DEL)
//! PREFIX prefix [page] [pageSize]  Live keys starting with prefix, paged
//! RANGE lo hi                      Live pairs with lo <= key <= hi (alias SCAN)
//! FLUSH                            Write the memtable out as a level-1 table
//! COMPACT [sizeTiered|leveled] [level]
//! VERIFY                           Check every table against its Merkle artifact
//! STATS                            Engine counters
//! EXIT                             Flush and shut down (alias QUIT)
//! ```
//!
//! ## Configuration
//!
//! The JSON config is read from `$LSM_CONFIG` (default `config.json`). If
//! the file does not exist the defaults are written there. Logging goes to
//! stderr and is filtered by `RUST_LOG` (default `warn`).
//!
//! ## Example
//!
//! ```text
//! $ cargo run -p cli
//! > PUT name Alice
//! OK ts=1718000000
//! > GET name
//! Alice
//! > PREFIX na
//! name
//! (1 keys)
//! > EXIT
//! bye
//! ```

use anyhow::{Context, Result};
use config::{CompactionAlgorithm, Config};
use engine::Engine;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_PAGE_SIZE: usize = 10;

/// What the loop should do after a command.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Loads the config, persisting the defaults when the file is missing.
fn load_config() -> Result<Config> {
    let path = PathBuf::from(
        std::env::var("LSM_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );
    if path.exists() {
        return Config::load(&path).with_context(|| format!("loading {}", path.display()));
    }
    let config = Config::default();
    config
        .save(&path)
        .with_context(|| format!("writing default config to {}", path.display()))?;
    info!(path = %path.display(), "wrote default config");
    Ok(config)
}

fn main() -> Result<()> {
    init_logging();
    let config = load_config()?;
    let mut engine = Engine::open(config)?;

    println!(
        "started (data_dir={}, compaction={:?}, tables={})",
        engine.config().data_dir.display(),
        engine.config().compaction.algorithm,
        engine.table_count()
    );
    println!("Commands: PUT key value | GET key | DELETE key | PREFIX p [page] [size]");
    println!("          RANGE lo hi | FLUSH | COMPACT [algo] [level] | VERIFY | STATS | EXIT");

    let stdin = io::stdin();
    let mut out = io::stdout();
    prompt(&mut out);

    for line in stdin.lock().lines() {
        let line = line?;
        if execute(&mut engine, &line, &mut out)? == Flow::Exit {
            break;
        }
        prompt(&mut out);
    }

    engine.shutdown()?;
    println!("bye");
    Ok(())
}

fn prompt(out: &mut impl Write) {
    let _ = write!(out, "> ");
    let _ = out.flush();
}

/// Runs one command line. Engine failures are printed as `ERR ...`; only
/// stdout failures are returned.
fn execute(engine: &mut Engine, line: &str, out: &mut impl Write) -> io::Result<Flow> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Ok(Flow::Continue);
    };

    match cmd.to_uppercase().as_str() {
        "PUT" | "SET" => {
            let key = parts.next();
            let value = parts.collect::<Vec<&str>>().join(" ");
            match key {
                Some(k) if !value.is_empty() => match engine.put(k.as_bytes(), value.as_bytes()) {
                    Ok(ack) => writeln!(out, "OK ts={}", ack.timestamp)?,
                    Err(e) => writeln!(out, "ERR put failed: {:#}", e)?,
                },
                _ => writeln!(out, "ERR usage: PUT key value")?,
            }
        }
        "GET" => match parts.next() {
            Some(k) => match engine.get(k.as_bytes()) {
                Ok(Some(v)) => writeln!(out, "{}", String::from_utf8_lossy(&v))?,
                Ok(None) => writeln!(out, "(nil)")?,
                Err(e) => writeln!(out, "ERR read failed: {:#}", e)?,
            },
            None => writeln!(out, "ERR usage: GET key")?,
        },
        "DELETE" | "DEL" => match parts.next() {
            Some(k) => match engine.delete(k.as_bytes()) {
                Ok(ack) => writeln!(out, "OK ts={}", ack.timestamp)?,
                Err(e) => writeln!(out, "ERR delete failed: {:#}", e)?,
            },
            None => writeln!(out, "ERR usage: DELETE key")?,
        },
        "PREFIX" => {
            let Some(prefix) = parts.next() else {
                writeln!(out, "ERR usage: PREFIX prefix [page] [pageSize]")?;
                return Ok(Flow::Continue);
            };
            let page = parts.next().map(str::parse::<usize>).unwrap_or(Ok(1));
            let size = parts.next().map(str::parse::<usize>).unwrap_or(Ok(DEFAULT_PAGE_SIZE));
            let (Ok(page), Ok(size)) = (page, size) else {
                writeln!(out, "ERR page and pageSize must be non-negative integers")?;
                return Ok(Flow::Continue);
            };
            match engine.prefix_scan(prefix.as_bytes(), page, size) {
                Ok(keys) if keys.is_empty() => writeln!(out, "(empty)")?,
                Ok(keys) => {
                    for k in &keys {
                        writeln!(out, "{}", String::from_utf8_lossy(k))?;
                    }
                    writeln!(out, "({} keys)", keys.len())?;
                }
                Err(e) => writeln!(out, "ERR prefix scan failed: {:#}", e)?,
            }
        }
        "RANGE" | "SCAN" => match (parts.next(), parts.next()) {
            (Some(lo), Some(hi)) => match engine.scan(lo.as_bytes(), hi.as_bytes()) {
                Ok(pairs) if pairs.is_empty() => writeln!(out, "(empty)")?,
                Ok(pairs) => {
                    for (k, v) in &pairs {
                        writeln!(
                            out,
                            "{} -> {}",
                            String::from_utf8_lossy(k),
                            String::from_utf8_lossy(v)
                        )?;
                    }
                    writeln!(out, "({} entries)", pairs.len())?;
                }
                Err(e) => writeln!(out, "ERR range scan failed: {:#}", e)?,
            },
            _ => writeln!(out, "ERR usage: RANGE lo hi")?,
        },
        "FLUSH" => match engine.force_flush() {
            Ok(true) => writeln!(out, "OK tables={:?}", engine.stats().tables_per_level)?,
            Ok(false) => writeln!(out, "OK (memtable empty)")?,
            Err(e) => writeln!(out, "ERR flush failed: {:#}", e)?,
        },
        "COMPACT" => {
            let algorithm = match parts.next().map(str::parse::<CompactionAlgorithm>) {
                None => engine.config().compaction.algorithm,
                Some(Ok(a)) => a,
                Some(Err(e)) => {
                    writeln!(out, "ERR {}", e)?;
                    return Ok(Flow::Continue);
                }
            };
            let level = match parts.next().map(str::parse::<u32>) {
                None => None,
                Some(Ok(l)) => Some(l),
                Some(Err(_)) => {
                    writeln!(out, "ERR level must be a positive integer")?;
                    return Ok(Flow::Continue);
                }
            };
            match engine.compact_with(algorithm, level) {
                Ok(()) => writeln!(out, "OK tables={:?}", engine.stats().tables_per_level)?,
                Err(e) => writeln!(out, "ERR compact failed: {:#}", e)?,
            }
        }
        "VERIFY" => match engine.verify_tables() {
            Ok(n) => writeln!(out, "OK verified={}", n)?,
            Err(e) => writeln!(out, "ERR verify failed: {:#}", e)?,
        },
        "STATS" => {
            let s = engine.stats();
            writeln!(out, "memtable_entries={}", s.memtable_entries)?;
            writeln!(out, "active_generation={}", s.active_generation)?;
            writeln!(out, "pending_wal_bytes={}", s.pending_wal_bytes)?;
            writeln!(out, "tables_per_level={:?}", s.tables_per_level)?;
            writeln!(
                out,
                "cache entries={} hits={} misses={}",
                s.cache_entries, s.cache_hits, s.cache_misses
            )?;
            writeln!(out, "flushes={} compactions={}", s.flushes, s.compactions)?;
        }
        "EXIT" | "QUIT" => return Ok(Flow::Exit),
        other => writeln!(out, "ERR unknown command: {}", other)?,
    }
    Ok(Flow::Continue)
}
