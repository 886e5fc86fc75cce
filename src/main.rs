//! walctl - inspect and replay write-ahead log directories

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wal_core::wal::{list_log_files, LogReader, ReadOutcome};
use wal_core::{LogRecord, LogRecovery, LoggingBackend, MemoryStore, WalConfig};

#[derive(Parser, Debug)]
#[command(name = "walctl")]
#[command(about = "Inspect and replay write-ahead log directories")]
struct Args {
    /// Log level
    #[arg(long, env = "WAL_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every frame as one JSON object per line
    Dump {
        /// Directory holding log_*.wal files
        #[arg(long, env = "WAL_LOG_DIR", default_value = "./wal")]
        log_dir: PathBuf,
    },

    /// Replay the log into an in-memory store and print the summary
    Recover {
        /// Directory holding log_*.wal files
        #[arg(long, env = "WAL_LOG_DIR", default_value = "./wal")]
        log_dir: PathBuf,

        /// Also print the surviving tuples of every table
        #[arg(long)]
        tuples: bool,
    },

    /// Print the effective configuration
    Config {
        /// Logging backend (file or none)
        #[arg(long, env = "WAL_BACKEND", default_value = "file")]
        backend: LoggingBackend,

        /// Block commits until durable
        #[arg(long, env = "WAL_SYNC_COMMIT", default_value = "false")]
        sync_commit: bool,

        /// Frontend flush interval in milliseconds
        #[arg(long, env = "WAL_FLUSH_INTERVAL_MS", default_value = "1000")]
        flush_interval_ms: u64,

        /// Buffer pool slots
        #[arg(long, env = "WAL_POOL_CAPACITY", default_value = "32")]
        pool_capacity: usize,

        /// Directory for log files
        #[arg(long, env = "WAL_LOG_DIR", default_value = "./wal")]
        log_dir: PathBuf,

        /// Rotate log files after this many bytes
        #[arg(long, env = "WAL_ROTATION_SIZE", default_value = "1048576")]
        rotation_size: u64,
    },
}

#[derive(Serialize)]
struct FrameLine<'a> {
    file: u64,
    offset: u64,
    #[serde(flatten)]
    record: &'a LogRecord,
}

#[derive(Serialize)]
struct TornLine {
    file: u64,
    offset: u64,
    torn: String,
}

#[derive(Serialize)]
struct TupleLine {
    table: String,
    location: String,
    bytes: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log_level))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match args.command {
        Command::Dump { log_dir } => dump(&log_dir, &mut out)?,
        Command::Recover { log_dir, tuples } => {
            let mut store = MemoryStore::new();
            let stats = LogRecovery::new(&log_dir)
                .run(&mut store)
                .with_context(|| format!("recovery of {} failed", log_dir.display()))?;
            serde_json::to_writer(&mut out, &stats)?;
            writeln!(out)?;

            if tuples {
                for table in store.tables() {
                    for (location, data) in store.live_tuples(table) {
                        let line = TupleLine {
                            table: table.to_string(),
                            location: location.to_string(),
                            bytes: data.len(),
                        };
                        serde_json::to_writer(&mut out, &line)?;
                        writeln!(out)?;
                    }
                }
            }
        }
        Command::Config {
            backend,
            sync_commit,
            flush_interval_ms,
            pool_capacity,
            log_dir,
            rotation_size,
        } => {
            let config = WalConfig {
                backend,
                sync_commit,
                flush_interval_ms,
                pool_capacity,
                log_dir,
                rotation_size,
                ..WalConfig::from_env()
            };
            serde_json::to_writer_pretty(&mut out, &config)?;
            writeln!(out)?;
        }
    }

    Ok(())
}

fn dump(log_dir: &std::path::Path, out: &mut impl Write) -> anyhow::Result<()> {
    let files = list_log_files(log_dir)
        .with_context(|| format!("cannot list {}", log_dir.display()))?;

    for (number, path) in files {
        let file = File::open(&path).with_context(|| format!("cannot open {}", path.display()))?;
        let file_len = file.metadata()?.len();
        let mut reader = LogReader::new(BufReader::new(file), file_len);

        loop {
            let offset = reader.offset();
            match reader.next_frame()? {
                ReadOutcome::Record(record) => {
                    let line = FrameLine {
                        file: number,
                        offset,
                        record: &record,
                    };
                    serde_json::to_writer(&mut *out, &line)?;
                    writeln!(out)?;
                }
                ReadOutcome::End => break,
                ReadOutcome::Torn { offset, error } => {
                    let line = TornLine {
                        file: number,
                        offset,
                        torn: error.to_string(),
                    };
                    serde_json::to_writer(&mut *out, &line)?;
                    writeln!(out)?;
                    break;
                }
            }
        }
    }
    Ok(())
}
