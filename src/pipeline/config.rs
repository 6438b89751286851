//! Pipeline configuration from environment variables
//!
//! Every horizon and width is a plain number of seconds so it can be tuned
//! without a rebuild. The retention horizon has no default: deployments have
//! run with 3h, 10h and 100h and the right value depends on how long raw
//! rows are wanted for inspection.

use super::bucket::DEFAULT_BUCKET_SECS;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Configuration for one pipeline invocation
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory scanned for capture files
    pub capture_dir: PathBuf,

    /// Capture file extension (without dot)
    pub capture_extension: String,

    /// Observation store (raw presence rows)
    pub db_path: PathBuf,

    /// Count store (long-lived summary)
    pub count_db_path: PathBuf,

    /// Bucket width in seconds
    pub bucket_secs: i64,

    /// Buckets written ahead of each capture as Synthetic
    pub forward_buckets: u32,

    /// Largest bridged gap between two sightings, in buckets
    pub max_gap_buckets: u32,

    /// Widest known-neighbour span interpolated before the weekday/day fallbacks
    pub interpolation_max_gap_secs: i64,

    /// Buckets newer than `now - aggregation_cutoff_secs` are not aggregated
    pub aggregation_cutoff_secs: i64,

    /// Observations older than `now - retention_horizon_secs` are evicted
    pub retention_horizon_secs: i64,

    /// Ingestion worker pool size
    pub workers: usize,

    /// Let an Original insert upgrade an existing Synthetic row
    pub upgrade_synthetic: bool,

    /// Run the observation gap filler
    pub gap_fill_enabled: bool,

    /// Run aggregation, count gap filling and eviction
    pub counting_enabled: bool,

    /// Captures stamped before Jan 1 of this year are skipped
    pub min_capture_year: i32,

    /// Count samples before Jan 1 of this year are purged
    pub count_floor_year: i32,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `ARPFLOW_CAPTURE_DIR` (default: /etc/arp_capture/pcap_files)
    /// - `ARPFLOW_CAPTURE_EXTENSION` (default: pcap)
    /// - `ARPFLOW_DB_PATH` (default: /etc/arp_capture/mac.db)
    /// - `ARPFLOW_COUNT_DB_PATH` (default: /etc/arp_capture/count.db)
    /// - `ARPFLOW_BUCKET_SECS` (default: 1800)
    /// - `ARPFLOW_FORWARD_BUCKETS` (default: 3)
    /// - `ARPFLOW_MAX_GAP_BUCKETS` (default: 4)
    /// - `ARPFLOW_INTERPOLATION_MAX_GAP_SECS` (default: 7200)
    /// - `ARPFLOW_AGGREGATION_CUTOFF_SECS` (default: 0)
    /// - `ARPFLOW_RETENTION_HORIZON_SECS` (required)
    /// - `ARPFLOW_WORKERS` (default: available parallelism)
    /// - `ARPFLOW_UPGRADE_SYNTHETIC` (default: true)
    /// - `ARPFLOW_GAP_FILL` (default: true)
    /// - `ARPFLOW_COUNTING` (default: true)
    /// - `ARPFLOW_MIN_CAPTURE_YEAR` (default: 2020)
    /// - `ARPFLOW_COUNT_FLOOR_YEAR` (default: 2000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let retention_horizon_secs = lookup("ARPFLOW_RETENTION_HORIZON_SECS")
            .ok_or_else(|| {
                ConfigError::MissingVariable("ARPFLOW_RETENTION_HORIZON_SECS".to_string())
            })
            .and_then(|raw| parse_value("ARPFLOW_RETENTION_HORIZON_SECS", &raw))?;

        let config = Self {
            capture_dir: lookup("ARPFLOW_CAPTURE_DIR")
                .unwrap_or_else(|| "/etc/arp_capture/pcap_files".to_string())
                .into(),
            capture_extension: lookup("ARPFLOW_CAPTURE_EXTENSION")
                .unwrap_or_else(|| "pcap".to_string()),
            db_path: lookup("ARPFLOW_DB_PATH")
                .unwrap_or_else(|| "/etc/arp_capture/mac.db".to_string())
                .into(),
            count_db_path: lookup("ARPFLOW_COUNT_DB_PATH")
                .unwrap_or_else(|| "/etc/arp_capture/count.db".to_string())
                .into(),
            bucket_secs: parse_or(&lookup, "ARPFLOW_BUCKET_SECS", DEFAULT_BUCKET_SECS)?,
            forward_buckets: parse_or(&lookup, "ARPFLOW_FORWARD_BUCKETS", 3)?,
            max_gap_buckets: parse_or(&lookup, "ARPFLOW_MAX_GAP_BUCKETS", 4)?,
            interpolation_max_gap_secs: parse_or(
                &lookup,
                "ARPFLOW_INTERPOLATION_MAX_GAP_SECS",
                2 * 60 * 60,
            )?,
            aggregation_cutoff_secs: parse_or(&lookup, "ARPFLOW_AGGREGATION_CUTOFF_SECS", 0)?,
            retention_horizon_secs,
            workers: parse_or(&lookup, "ARPFLOW_WORKERS", default_workers)?,
            upgrade_synthetic: parse_or(&lookup, "ARPFLOW_UPGRADE_SYNTHETIC", true)?,
            gap_fill_enabled: parse_or(&lookup, "ARPFLOW_GAP_FILL", true)?,
            counting_enabled: parse_or(&lookup, "ARPFLOW_COUNTING", true)?,
            min_capture_year: parse_or(&lookup, "ARPFLOW_MIN_CAPTURE_YEAR", 2020)?,
            count_floor_year: parse_or(&lookup, "ARPFLOW_COUNT_FLOOR_YEAR", 2000)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket_secs <= 0 {
            return Err(ConfigError::InvalidValue(
                "ARPFLOW_BUCKET_SECS must be positive".to_string(),
            ));
        }
        if self.workers == 0 || self.workers > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidValue(format!(
                "ARPFLOW_WORKERS must be between 1 and {}",
                tokio::sync::Semaphore::MAX_PERMITS
            )));
        }
        if self.aggregation_cutoff_secs < 0 || self.retention_horizon_secs < 0 {
            return Err(ConfigError::InvalidValue(
                "cutoff and retention horizon must not be negative".to_string(),
            ));
        }
        if self.retention_horizon_secs < self.aggregation_cutoff_secs {
            // Rows in [now - cutoff, now - horizon) get evicted before they settle
            log::warn!(
                "⚠️  Retention horizon ({}s) is shorter than aggregation cutoff ({}s): some buckets will never get an original count",
                self.retention_horizon_secs,
                self.aggregation_cutoff_secs
            );
        }
        Ok(())
    }

    /// Largest bridged gap in seconds
    pub fn max_gap_secs(&self) -> i64 {
        self.bucket_secs * i64::from(self.max_gap_buckets)
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{}={}", key, raw)))
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}
