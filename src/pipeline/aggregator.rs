//! Aggregator - distinct address counts per settled bucket
//!
//! A bucket is settled once it is strictly older than the cutoff: no capture
//! landing in it is expected any more. Original and Synthetic rows both
//! count as "believed present".

use super::db::{CountStore, ObservationStore, StoreError};
use std::sync::Arc;

pub struct Aggregator {
    observations: Arc<dyn ObservationStore>,
    counts: Arc<dyn CountStore>,
}

impl Aggregator {
    pub fn new(observations: Arc<dyn ObservationStore>, counts: Arc<dyn CountStore>) -> Self {
        Self {
            observations,
            counts,
        }
    }

    /// Upsert an Original count sample for every bucket older than `cutoff`
    ///
    /// Overwrites any earlier sample for those buckets, filled or not.
    /// Returns the number of buckets written.
    pub async fn aggregate(&self, cutoff: i64) -> Result<usize, StoreError> {
        let counts = self.observations.distinct_counts_before(cutoff).await?;
        if counts.is_empty() {
            log::info!("📊 Aggregation: no settled buckets before {}", cutoff);
            return Ok(0);
        }

        let written = self.counts.upsert_original(&counts).await?;
        log::info!("📊 Aggregation: {} buckets counted", written);
        Ok(written)
    }
}
