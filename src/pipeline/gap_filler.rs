//! Observation gap filler
//!
//! Captures miss devices now and then. When an address disappears for a
//! short stretch and comes back, the stretch is bridged with Synthetic rows.
//! Longer absences are treated as real and left empty.

use super::db::{ObservationStore, StoreError};
use std::sync::Arc;

pub struct GapFiller {
    store: Arc<dyn ObservationStore>,
    bucket_secs: i64,
    max_gap_buckets: u32,
}

impl GapFiller {
    pub fn new(store: Arc<dyn ObservationStore>, bucket_secs: i64, max_gap_buckets: u32) -> Self {
        Self {
            store,
            bucket_secs,
            max_gap_buckets,
        }
    }

    /// Bridge every per-address gap wider than one bucket and at most
    /// `max_gap_buckets` buckets. Returns rows inserted.
    ///
    /// Idempotent: a second run finds no bridgeable gaps left.
    pub async fn fill_gaps(&self) -> Result<usize, StoreError> {
        let max_gap_secs = self.bucket_secs * i64::from(self.max_gap_buckets);
        let inserted = self.store.fill_gaps(self.bucket_secs, max_gap_secs).await?;
        log::info!("🧩 Gap fill: {} synthetic rows", inserted);
        Ok(inserted)
    }
}
