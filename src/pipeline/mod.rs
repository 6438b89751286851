//! Presence pipeline
//!
//! Turns capture files into two persisted series:
//! - `observations`: which address was believed present in which bucket
//! - `count_samples`: how many distinct addresses were present per bucket
//!
//! ## Modules
//!
//! - `bucket`: timestamp to bucket normalization
//! - `types`: row types and their provenance enums
//! - `config`: environment configuration
//! - `db`: store traits and SQLite implementations
//! - `ingestion`: capture ingestion with forward extrapolation
//! - `gap_filler`: bridges short per-address absences
//! - `aggregator`: distinct counts for settled buckets
//! - `retention`: raw-row eviction and count floor purge
//! - `count_filler`: fills missing buckets in the count series
//! - `engine`: one invocation, stage by stage

pub mod aggregator;
pub mod bucket;
pub mod config;
pub mod count_filler;
pub mod db;
pub mod engine;
pub mod gap_filler;
pub mod ingestion;
pub mod retention;
pub mod types;

pub use aggregator::Aggregator;
pub use config::{ConfigError, PipelineConfig};
pub use count_filler::{fill_count_series, CountFillReport, CountGapFiller};
pub use db::{
    CountStore, InsertSummary, ObservationStore, SqliteCountStore, SqliteObservationStore,
    StoreError,
};
pub use engine::{PipelineEngine, PipelineError, RunReport};
pub use gap_filler::GapFiller;
pub use ingestion::{
    ingest_capture_files, FileIngestReport, IngestLimits, IngestReport, Ingestor,
};
pub use retention::RetentionManager;
pub use types::{CountMethod, CountSample, Observation, Origin};
