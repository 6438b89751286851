//! Count gap filler
//!
//! The count series is re-sampled onto the bucket grid; a bucket with no row
//! is missing (not zero). Each missing bucket gets the first value that
//! applies:
//!
//! 1. interpolation between the nearest known neighbours, when they are at
//!    most `interpolation_max_gap_secs` apart
//! 2. the known value exactly one week earlier
//! 3. the known value exactly one day earlier
//! 4. interpolation between the nearest known neighbours, uncapped
//! 5. zero
//!
//! Only Original samples are "known". Filled samples are recomputed on every
//! run; Original samples are never touched.

use super::bucket::{grid, last_settled_bucket};
use super::db::{CountStore, StoreError};
use super::types::{CountMethod, CountSample};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

const DAY_SECS: i64 = 24 * 60 * 60;
const WEEK_SECS: i64 = 7 * DAY_SECS;

/// Filled buckets per method for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountFillReport {
    pub interpolated: usize,
    pub same_weekday: usize,
    pub same_prior_day: usize,
    pub zero: usize,
}

impl CountFillReport {
    pub fn total(&self) -> usize {
        self.interpolated + self.same_weekday + self.same_prior_day + self.zero
    }

    fn record(&mut self, method: CountMethod) {
        match method {
            CountMethod::Interpolated => self.interpolated += 1,
            CountMethod::SameWeekday => self.same_weekday += 1,
            CountMethod::SamePriorDay => self.same_prior_day += 1,
            CountMethod::Zero => self.zero += 1,
            CountMethod::Original => {}
        }
    }
}

/// Fill every missing grid bucket in `[start, end]`
///
/// `known` maps bucket to Original count. Returns only the filled samples,
/// in bucket order.
pub fn fill_count_series(
    known: &BTreeMap<i64, u32>,
    start: i64,
    end: i64,
    width_secs: i64,
    interpolation_max_gap_secs: i64,
) -> Vec<CountSample> {
    grid(start, end, width_secs)
        .filter(|bucket| !known.contains_key(bucket))
        .map(|bucket| fill_bucket(known, bucket, interpolation_max_gap_secs))
        .collect()
}

fn fill_bucket(known: &BTreeMap<i64, u32>, bucket: i64, max_gap: i64) -> CountSample {
    let before = known.range(..bucket).next_back();
    let after = known.range(bucket + 1..).next();

    if let (Some(before), Some(after)) = (before, after) {
        if after.0 - before.0 <= max_gap {
            let count = interpolate(before, after, bucket);
            return CountSample::new(bucket, count, CountMethod::Interpolated);
        }
    }

    if let Some(count) = known.get(&(bucket - WEEK_SECS)) {
        return CountSample::new(bucket, *count, CountMethod::SameWeekday);
    }

    if let Some(count) = known.get(&(bucket - DAY_SECS)) {
        return CountSample::new(bucket, *count, CountMethod::SamePriorDay);
    }

    match (before, after) {
        (Some(before), Some(after)) => {
            CountSample::new(bucket, interpolate(before, after, bucket), CountMethod::Interpolated)
        }
        _ => CountSample::new(bucket, 0, CountMethod::Zero),
    }
}

/// Linear by fractional position, rounded half away from zero
fn interpolate(before: (&i64, &u32), after: (&i64, &u32), bucket: i64) -> u32 {
    let (t0, c0) = (*before.0 as f64, f64::from(*before.1));
    let (t1, c1) = (*after.0 as f64, f64::from(*after.1));
    let fraction = (bucket as f64 - t0) / (t1 - t0);
    (c0 + (c1 - c0) * fraction).round().max(0.0) as u32
}

pub struct CountGapFiller {
    counts: Arc<dyn CountStore>,
    bucket_secs: i64,
    interpolation_max_gap_secs: i64,
}

impl CountGapFiller {
    pub fn new(
        counts: Arc<dyn CountStore>,
        bucket_secs: i64,
        interpolation_max_gap_secs: i64,
    ) -> Self {
        Self {
            counts,
            bucket_secs,
            interpolation_max_gap_secs,
        }
    }

    /// Fill the series from the first Original sample onwards
    ///
    /// With `until`, the grid is extended to the last bucket settled at that
    /// cutoff, so trailing buckets with no observations at all still get a
    /// sample.
    pub async fn fill_count_gaps(&self, until: Option<i64>) -> Result<CountFillReport, StoreError> {
        let known: BTreeMap<i64, u32> = self
            .counts
            .samples()
            .await?
            .into_iter()
            .filter(|s| s.is_original())
            .map(|s| (s.bucket, s.count))
            .collect();

        let (Some(&first), Some(&last)) = (known.keys().next(), known.keys().next_back()) else {
            log::info!("🧮 Count fill: no original samples yet");
            return Ok(CountFillReport::default());
        };

        let end = until
            .map(|cutoff| last_settled_bucket(cutoff, self.bucket_secs).max(last))
            .unwrap_or(last);

        let filled = fill_count_series(
            &known,
            first,
            end,
            self.bucket_secs,
            self.interpolation_max_gap_secs,
        );

        let mut report = CountFillReport::default();
        for sample in &filled {
            report.record(sample.method);
        }

        if !filled.is_empty() {
            self.counts.write_filled(&filled).await?;
        }

        log::info!("🧮 Count fill: {} buckets", report.total());
        log::info!("   ├─ Interpolated: {}", report.interpolated);
        log::info!("   ├─ Same weekday: {}", report.same_weekday);
        log::info!("   ├─ Same prior day: {}", report.same_prior_day);
        log::info!("   └─ Zero: {}", report.zero);

        Ok(report)
    }
}
