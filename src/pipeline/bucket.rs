//! Bucket normalization
//!
//! A capture stamped at T covers the interval ending at T, so timestamps are
//! rounded UP to the next bucket boundary. A timestamp already on a boundary
//! is its own bucket.

/// Default bucket width: 30 minutes
pub const DEFAULT_BUCKET_SECS: i64 = 30 * 60;

/// Round `timestamp` up to the next multiple of `width_secs`
///
/// `width_secs` must be positive (enforced by `PipelineConfig::validate`).
pub fn round_up(timestamp: i64, width_secs: i64) -> i64 {
    let rem = timestamp.rem_euclid(width_secs);
    if rem == 0 {
        timestamp
    } else {
        timestamp - rem + width_secs
    }
}

/// Round `timestamp` down to the enclosing bucket boundary
pub fn round_down(timestamp: i64, width_secs: i64) -> i64 {
    timestamp - timestamp.rem_euclid(width_secs)
}

/// Last bucket strictly older than `cutoff`
///
/// Buckets at or after the cutoff are not settled yet.
pub fn last_settled_bucket(cutoff: i64, width_secs: i64) -> i64 {
    let floor = round_down(cutoff, width_secs);
    if floor == cutoff {
        floor - width_secs
    } else {
        floor
    }
}

/// Inclusive grid of buckets from `start` to `end` stepping by `width_secs`
pub fn grid(start: i64, end: i64, width_secs: i64) -> impl Iterator<Item = i64> {
    let steps = if end < start {
        0
    } else {
        (end - start) / width_secs + 1
    };
    (0..steps).map(move |i| start + i * width_secs)
}
