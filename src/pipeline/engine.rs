//! Pipeline Engine - one unattended invocation
//!
//! ```text
//! select capture files
//!     ↓
//! ingest (bounded worker pool, one transaction per file)
//!     ↓
//! gap fill → purge count floor → aggregate → count fill → evict
//! ```
//!
//! Stages after ingestion run strictly in sequence. A failing stage is
//! logged and recorded in the [`RunReport`]; the stages after it still run.
//! Nothing inside `run_once` returns an error to the caller.

use super::aggregator::Aggregator;
use super::config::{ConfigError, PipelineConfig};
use super::count_filler::{CountFillReport, CountGapFiller};
use super::db::{CountStore, ObservationStore, SqliteCountStore, SqliteObservationStore, StoreError};
use super::gap_filler::GapFiller;
use super::ingestion::{ingest_capture_files, FileIngestReport, IngestLimits, Ingestor};
use super::retention::RetentionManager;
use crate::capture::{select_capture_files, CaptureSource, PcapCaptureSource};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Counters for one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub now: i64,
    pub ingestion: FileIngestReport,
    pub gap_filled: usize,
    pub purged_counts: usize,
    pub aggregated_buckets: usize,
    pub count_fill: CountFillReport,
    pub evicted_observations: usize,
    pub failed_stages: Vec<String>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failed_stages.is_empty()
            && self.ingestion.read_failures == 0
            && self.ingestion.write_failures == 0
    }

    fn stage_failed(&mut self, stage: &str, error: &dyn std::fmt::Display) {
        log::error!("❌ Stage '{}' failed: {}", stage, error);
        self.failed_stages.push(stage.to_string());
    }
}

pub struct PipelineEngine {
    config: PipelineConfig,
    observations: Arc<dyn ObservationStore>,
    counts: Arc<dyn CountStore>,
    source: Arc<dyn CaptureSource>,
}

impl PipelineEngine {
    /// Open both SQLite stores named in `config` with the pcap reader
    pub fn open(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        log::info!("📂 Observation store: {}", config.db_path.display());
        let observations = Arc::new(SqliteObservationStore::open(&config.db_path)?);

        log::info!("📂 Count store: {}", config.count_db_path.display());
        let counts = Arc::new(SqliteCountStore::open(&config.count_db_path)?);

        Ok(Self::with_stores(
            config,
            observations,
            counts,
            Arc::new(PcapCaptureSource::new()),
        ))
    }

    /// Wire the engine to arbitrary stores and capture reader
    pub fn with_stores(
        config: PipelineConfig,
        observations: Arc<dyn ObservationStore>,
        counts: Arc<dyn CountStore>,
        source: Arc<dyn CaptureSource>,
    ) -> Self {
        Self {
            config,
            observations,
            counts,
            source,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage once, `now` in Unix seconds
    pub async fn run_once(&self, now: i64) -> RunReport {
        let config = &self.config;
        let mut report = RunReport {
            now,
            ..Default::default()
        };

        log::info!("🚀 Pipeline run at {}", now);

        match select_capture_files(&config.capture_dir, &config.capture_extension) {
            Ok(files) => {
                let ingestor = Ingestor::new(
                    self.observations.clone(),
                    config.bucket_secs,
                    config.forward_buckets,
                    config.upgrade_synthetic,
                );
                report.ingestion = ingest_capture_files(
                    files,
                    self.source.clone(),
                    ingestor,
                    config.workers,
                    IngestLimits {
                        min_capture_year: config.min_capture_year,
                        stale_before: Some(now - config.retention_horizon_secs),
                    },
                )
                .await;
            }
            Err(e) => report.stage_failed("ingest", &e),
        }

        if config.gap_fill_enabled {
            let filler = GapFiller::new(
                self.observations.clone(),
                config.bucket_secs,
                config.max_gap_buckets,
            );
            match filler.fill_gaps().await {
                Ok(n) => report.gap_filled = n,
                Err(e) => report.stage_failed("gap_fill", &e),
            }
        }

        let retention = RetentionManager::new(self.observations.clone(), self.counts.clone());
        match retention.purge_counts_before_year(config.count_floor_year).await {
            Ok(n) => report.purged_counts = n,
            Err(e) => report.stage_failed("purge_counts", &e),
        }

        if !config.counting_enabled {
            log::info!("👀 Counting disabled: skipping aggregation, count fill and eviction");
            log_summary(&report);
            return report;
        }

        let cutoff = now - config.aggregation_cutoff_secs;

        let aggregator = Aggregator::new(self.observations.clone(), self.counts.clone());
        match aggregator.aggregate(cutoff).await {
            Ok(n) => report.aggregated_buckets = n,
            Err(e) => report.stage_failed("aggregate", &e),
        }

        let count_filler = CountGapFiller::new(
            self.counts.clone(),
            config.bucket_secs,
            config.interpolation_max_gap_secs,
        );
        match count_filler.fill_count_gaps(Some(cutoff)).await {
            Ok(fill) => report.count_fill = fill,
            Err(e) => report.stage_failed("count_fill", &e),
        }

        match retention.evict(now, config.retention_horizon_secs).await {
            Ok(n) => report.evicted_observations = n,
            Err(e) => report.stage_failed("evict", &e),
        }

        log_summary(&report);
        report
    }
}

fn log_summary(report: &RunReport) {
    let ingestion = &report.ingestion;
    log::info!("📊 Run summary:");
    log::info!(
        "   ├─ Files: {} selected, {} ingested, {} skipped, {} stale",
        ingestion.files_selected,
        ingestion.files_ingested,
        ingestion.files_skipped,
        ingestion.files_stale
    );
    log::info!(
        "   ├─ Failures: {} read, {} write, {} delete",
        ingestion.read_failures,
        ingestion.write_failures,
        ingestion.delete_failures
    );
    log::info!(
        "   ├─ Rows: {} original, {} synthetic, {} gap-filled",
        ingestion.original_rows,
        ingestion.synthetic_rows,
        report.gap_filled
    );
    log::info!(
        "   ├─ Counts: {} aggregated, {} filled, {} purged",
        report.aggregated_buckets,
        report.count_fill.total(),
        report.purged_counts
    );
    log::info!("   └─ Evicted: {}", report.evicted_observations);

    if !report.failed_stages.is_empty() {
        log::warn!("⚠️  Failed stages: {}", report.failed_stages.join(", "));
    }
}
