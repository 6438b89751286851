//! arpflow_export - dump a store table as JSON lines
//!
//! Usage:
//!   arpflow_export --table observations|counts [--db PATH]
//!
//! Without `--db`, the path comes from `ARPFLOW_DB_PATH` or
//! `ARPFLOW_COUNT_DB_PATH` (same defaults as the pipeline).

use arpflow::pipeline::{CountStore, ObservationStore, SqliteCountStore, SqliteObservationStore};
use serde::Serialize;
use std::env;
use std::io::{self, BufWriter, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Table {
    Observations,
    Counts,
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|x| x == flag)
        .and_then(|idx| args.get(idx + 1))
        .cloned()
}

fn parse_table_from_args(args: &[String]) -> Result<Table, String> {
    match arg_value(args, "--table").as_deref() {
        Some("observations") => Ok(Table::Observations),
        Some("counts") => Ok(Table::Counts),
        Some(other) => Err(format!("unknown table '{}' (observations|counts)", other)),
        None => Err("usage: arpflow_export --table observations|counts [--db PATH]".to_string()),
    }
}

fn write_jsonl<T: Serialize>(rows: &[T]) -> Result<(), Box<dyn std::error::Error>> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for row in rows {
        serde_json::to_writer(&mut out, row)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let table = parse_table_from_args(&args)?;

    match table {
        Table::Observations => {
            let path = arg_value(&args, "--db")
                .or_else(|| env::var("ARPFLOW_DB_PATH").ok())
                .unwrap_or_else(|| "/etc/arp_capture/mac.db".to_string());
            let store = SqliteObservationStore::open(&path)?;
            let rows = store.observations().await?;
            log::info!("📤 Exporting {} observations from {}", rows.len(), path);
            write_jsonl(&rows)?;
        }
        Table::Counts => {
            let path = arg_value(&args, "--db")
                .or_else(|| env::var("ARPFLOW_COUNT_DB_PATH").ok())
                .unwrap_or_else(|| "/etc/arp_capture/count.db".to_string());
            let store = SqliteCountStore::open(&path)?;
            let samples = store.samples().await?;
            log::info!("📤 Exporting {} count samples from {}", samples.len(), path);
            write_jsonl(&samples)?;
        }
    }

    Ok(())
}
