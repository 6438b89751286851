//! arpflow - one unattended pipeline invocation
//!
//! Meant to be triggered externally (cron, systemd timer). Ingests every
//! settled capture file, fills gaps, aggregates, fills count gaps and evicts
//! old raw rows, then exits.
//!
//! Usage:
//!   cargo run --release --bin arpflow
//!
//! Environment variables: see `PipelineConfig::from_env`.
//! `ARPFLOW_RETENTION_HORIZON_SECS` is required.

use arpflow::pipeline::{PipelineConfig, PipelineEngine};
use chrono::Utc;
use log::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 arpflow v{}", env!("CARGO_PKG_VERSION"));

    let config = PipelineConfig::from_env()?;
    info!("   ├─ Captures: {}", config.capture_dir.display());
    info!("   ├─ Bucket width: {}s", config.bucket_secs);
    info!("   ├─ Workers: {}", config.workers);
    info!("   ├─ Aggregation cutoff: {}s", config.aggregation_cutoff_secs);
    info!("   └─ Retention horizon: {}s", config.retention_horizon_secs);

    let engine = PipelineEngine::open(config)?;
    let report = engine.run_once(Utc::now().timestamp()).await;

    if report.is_clean() {
        info!("✅ Pipeline run complete");
    } else {
        info!("⚠️  Pipeline run complete with failures (files left in place are retried next run)");
    }

    Ok(())
}
