//! Retention - bounded raw data, unbounded summary
//!
//! Raw observations older than the horizon are deleted for good. Count
//! samples are kept forever, except ones stamped before the configured floor
//! year (left behind by captures taken with an unset clock).
//!
//! Eviction must run after aggregation in the same pass; a bucket evicted
//! before it was counted never gets an Original sample.

use super::db::{CountStore, ObservationStore, StoreError};
use chrono::{TimeZone, Utc};
use std::sync::Arc;

pub struct RetentionManager {
    observations: Arc<dyn ObservationStore>,
    counts: Arc<dyn CountStore>,
}

impl RetentionManager {
    pub fn new(observations: Arc<dyn ObservationStore>, counts: Arc<dyn CountStore>) -> Self {
        Self {
            observations,
            counts,
        }
    }

    /// Delete every observation with `bucket < now - horizon_secs`
    pub async fn evict(&self, now: i64, horizon_secs: i64) -> Result<usize, StoreError> {
        let cutoff = now - horizon_secs;
        let deleted = self.observations.delete_before(cutoff).await?;
        log::info!("🗑️  Evicted {} observations older than {}", deleted, cutoff);
        Ok(deleted)
    }

    /// Delete count samples stamped before Jan 1 of `floor_year`
    pub async fn purge_counts_before_year(&self, floor_year: i32) -> Result<usize, StoreError> {
        let Some(floor) = Utc
            .with_ymd_and_hms(floor_year, 1, 1, 0, 0, 0)
            .single()
            .map(|dt| dt.timestamp())
        else {
            log::warn!("⚠️  Invalid count floor year {}, nothing purged", floor_year);
            return Ok(0);
        };

        let deleted = self.counts.delete_before(floor).await?;
        if deleted > 0 {
            log::info!("🗑️  Purged {} count samples before {}", deleted, floor_year);
        }
        Ok(deleted)
    }
}
