//! Ingestion - capture files into the observation store
//!
//! Each capture becomes one independent batch: the Original rows for its
//! bucket plus Synthetic rows for the next `forward_buckets` buckets. A
//! device seen at T is very likely still around at T+30m even when the
//! next capture misses it; the forward depth caps how much presence is
//! invented.
//!
//! Files are ingested on a bounded worker pool. Batches only use
//! insert-or-ignore (plus the one-way Synthetic→Original upgrade), so
//! workers writing overlapping keys commute.

use super::bucket::round_up;
use super::db::{InsertSummary, ObservationStore, StoreError};
use super::types::{Observation, Origin};
use crate::capture::{timestamp_from_file_name, Capture, CaptureError, CaptureSource};
use chrono::{Datelike, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Result of ingesting one set of addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub bucket: i64,
    pub inserted: InsertSummary,
}

/// Writes observed address sets into the observation store
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn ObservationStore>,
    bucket_secs: i64,
    forward_buckets: u32,
    upgrade_synthetic: bool,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn ObservationStore>,
        bucket_secs: i64,
        forward_buckets: u32,
        upgrade_synthetic: bool,
    ) -> Self {
        Self {
            store,
            bucket_secs,
            forward_buckets,
            upgrade_synthetic,
        }
    }

    /// Bucket a capture stamped `timestamp` lands in
    pub fn bucket_for(&self, timestamp: i64) -> i64 {
        round_up(timestamp, self.bucket_secs)
    }

    /// Ingest addresses seen by a capture stamped `timestamp`
    ///
    /// The timestamp is rounded up to its bucket. Nothing is written for an
    /// empty set.
    pub async fn ingest(
        &self,
        timestamp: i64,
        addresses: &BTreeSet<String>,
    ) -> Result<IngestReport, StoreError> {
        let bucket = self.bucket_for(timestamp);
        if addresses.is_empty() {
            return Ok(IngestReport {
                bucket,
                inserted: InsertSummary::default(),
            });
        }

        let mut rows = Vec::with_capacity(addresses.len() * (1 + self.forward_buckets as usize));
        rows.extend(
            addresses
                .iter()
                .map(|address| Observation::new(bucket, address.as_str(), Origin::Original)),
        );
        for step in 1..=i64::from(self.forward_buckets) {
            let ahead = bucket + step * self.bucket_secs;
            rows.extend(
                addresses
                    .iter()
                    .map(|address| Observation::new(ahead, address.as_str(), Origin::Synthetic)),
            );
        }

        let inserted = self.store.insert_batch(&rows, self.upgrade_synthetic).await?;
        Ok(IngestReport { bucket, inserted })
    }
}

/// Which captures are still worth ingesting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestLimits {
    /// Captures stamped before Jan 1 of this year are skipped
    pub min_capture_year: i32,
    /// Captures whose bucket is older than this are skipped; their bucket
    /// has already been aggregated and evicted
    pub stale_before: Option<i64>,
}

/// What happened to one capture file
#[derive(Debug)]
pub enum FileOutcome {
    /// Ingested and deleted
    Ingested {
        report: IngestReport,
        addresses: usize,
        packets: usize,
    },
    /// Ingested, but the file could not be removed (re-ingested harmlessly
    /// until its bucket falls behind the retention horizon)
    DeleteFailed {
        report: IngestReport,
        error: std::io::Error,
    },
    /// Capture stamped before the minimum year; left in place
    Skipped { year: i32 },
    /// Bucket already behind the retention horizon; left in place
    Stale { bucket: i64 },
    /// Capture could not be read; left in place for the next run
    ReadFailed(CaptureError),
    /// Store rejected the batch; left in place for the next run
    WriteFailed(StoreError),
}

/// Counters for one pass over the capture directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileIngestReport {
    pub files_selected: usize,
    pub files_ingested: usize,
    pub files_skipped: usize,
    pub files_stale: usize,
    pub read_failures: usize,
    pub write_failures: usize,
    pub delete_failures: usize,
    pub original_rows: usize,
    pub synthetic_rows: usize,
}

impl FileIngestReport {
    fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Ingested { report, .. } => {
                self.files_ingested += 1;
                self.original_rows += report.inserted.original;
                self.synthetic_rows += report.inserted.synthetic;
            }
            FileOutcome::DeleteFailed { report, .. } => {
                self.files_ingested += 1;
                self.delete_failures += 1;
                self.original_rows += report.inserted.original;
                self.synthetic_rows += report.inserted.synthetic;
            }
            FileOutcome::Skipped { .. } => self.files_skipped += 1,
            FileOutcome::Stale { .. } => self.files_stale += 1,
            FileOutcome::ReadFailed(_) => self.read_failures += 1,
            FileOutcome::WriteFailed(_) => self.write_failures += 1,
        }
    }
}

/// Read, ingest and delete one capture file
///
/// Year and staleness come from the file name, before the file is read.
/// The file is deleted only after its batch committed.
pub async fn process_capture_file(
    path: PathBuf,
    source: Arc<dyn CaptureSource>,
    ingestor: Ingestor,
    limits: IngestLimits,
) -> FileOutcome {
    let stamped = match timestamp_from_file_name(&path) {
        Ok(ts) => ts,
        Err(e) => {
            log::error!("❌ Failed to read capture {}: {}", path.display(), e);
            return FileOutcome::ReadFailed(e);
        }
    };

    let year = Utc
        .timestamp_opt(stamped, 0)
        .single()
        .map(|dt| dt.year())
        .unwrap_or(i32::MIN);
    if year < limits.min_capture_year {
        log::warn!(
            "⚠️  Skipping {} (stamped {}, before {})",
            path.display(),
            year,
            limits.min_capture_year
        );
        return FileOutcome::Skipped { year };
    }

    let bucket = ingestor.bucket_for(stamped);
    if let Some(stale_before) = limits.stale_before {
        if bucket < stale_before {
            log::warn!(
                "⚠️  Skipping {} (bucket {} is behind the retention horizon {})",
                path.display(),
                bucket,
                stale_before
            );
            return FileOutcome::Stale { bucket };
        }
    }

    let read_path = path.clone();
    let read = tokio::task::spawn_blocking(move || source.read(&read_path)).await;

    let capture: Capture = match read {
        Ok(Ok(capture)) => capture,
        Ok(Err(e)) => {
            log::error!("❌ Failed to read capture {}: {}", path.display(), e);
            return FileOutcome::ReadFailed(e);
        }
        Err(join_err) => {
            log::error!("❌ Capture reader for {} panicked: {}", path.display(), join_err);
            return FileOutcome::ReadFailed(CaptureError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                join_err.to_string(),
            )));
        }
    };

    let report = match ingestor.ingest(capture.timestamp, &capture.addresses).await {
        Ok(report) => report,
        Err(e) => {
            log::error!("❌ Failed to store observations from {}: {}", path.display(), e);
            return FileOutcome::WriteFailed(e);
        }
    };

    if let Err(e) = tokio::fs::remove_file(&path).await {
        log::error!("❌ Failed to delete processed file {}: {}", path.display(), e);
        return FileOutcome::DeleteFailed { report, error: e };
    }

    log::info!(
        "✅ {} ({} MACs, {} packets | {} original, {} synthetic)",
        path.display(),
        capture.addresses.len(),
        capture.packet_count,
        report.inserted.original,
        report.inserted.synthetic
    );

    FileOutcome::Ingested {
        report,
        addresses: capture.addresses.len(),
        packets: capture.packet_count,
    }
}

/// Ingest capture files on a pool of at most `workers` concurrent tasks
///
/// Failures are logged and counted; they never abort the pass.
pub async fn ingest_capture_files(
    files: Vec<PathBuf>,
    source: Arc<dyn CaptureSource>,
    ingestor: Ingestor,
    workers: usize,
    limits: IngestLimits,
) -> FileIngestReport {
    let mut report = FileIngestReport {
        files_selected: files.len(),
        ..Default::default()
    };

    if files.is_empty() {
        return report;
    }

    let workers = workers.clamp(1, Semaphore::MAX_PERMITS);
    log::info!(
        "📥 Ingesting {} capture files ({} workers)",
        files.len(),
        workers
    );

    let permits = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();

    for path in files {
        let permits = permits.clone();
        let source = source.clone();
        let ingestor = ingestor.clone();
        tasks.spawn(async move {
            // Semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            process_capture_file(path, source, ingestor, limits).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => report.record(&outcome),
            Err(e) => {
                log::error!("❌ Ingestion task failed: {}", e);
                report.write_failures += 1;
            }
        }
    }

    log::info!(
        "📊 Ingestion: {}/{} files ({} skipped, {} stale) | {} original, {} synthetic rows | {} read / {} write / {} delete failures",
        report.files_ingested,
        report.files_selected,
        report.files_skipped,
        report.files_stale,
        report.original_rows,
        report.synthetic_rows,
        report.read_failures,
        report.write_failures,
        report.delete_failures
    );

    report
}
