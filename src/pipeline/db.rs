//! Presence stores: raw observations and the long-lived count summary
//!
//! Two independent keyed tables, each in its own SQLite file:
//! - `observations` - PK (bucket, address), evicted by retention
//! - `count_samples` - PK (bucket), never evicted
//!
//! There is no foreign key and no transaction spanning both tables.
//! Schemas live in `/sql/` and are applied with "IF NOT EXISTS" on open.

use super::types::{CountMethod, CountSample, Observation, Origin};
use crate::sqlite_pragma::apply_optimized_pragmas;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const OBSERVATIONS_SCHEMA: &str = include_str!("../../sql/01_observations.sql");
const COUNT_SAMPLES_SCHEMA: &str = include_str!("../../sql/02_count_samples.sql");

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store connection lock poisoned")]
    Poisoned,
}

/// Rows changed by one observation batch, split by the origin written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub original: usize,
    pub synthetic: usize,
}

impl InsertSummary {
    pub fn total(&self) -> usize {
        self.original + self.synthetic
    }
}

/// Raw presence table
///
/// Inserts are insert-or-ignore on (bucket, address), so concurrent batches
/// touching the same keys commute.
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Insert one batch in a single transaction
    ///
    /// With `upgrade_synthetic`, an Original row replaces an existing
    /// Synthetic row for the same key. A Synthetic row never replaces
    /// anything.
    async fn insert_batch(
        &self,
        rows: &[Observation],
        upgrade_synthetic: bool,
    ) -> Result<InsertSummary, StoreError>;

    /// Bridge per-address gaps `g` with `width < g <= max_gap` using
    /// Synthetic rows on every intermediate bucket. Returns rows inserted.
    async fn fill_gaps(&self, width_secs: i64, max_gap_secs: i64) -> Result<usize, StoreError>;

    /// Distinct address count for every bucket strictly older than `cutoff`
    async fn distinct_counts_before(&self, cutoff: i64) -> Result<Vec<(i64, u32)>, StoreError>;

    /// Delete every row with `bucket < cutoff`. Returns rows deleted.
    async fn delete_before(&self, cutoff: i64) -> Result<usize, StoreError>;

    /// Full table in (bucket, address) order
    async fn observations(&self) -> Result<Vec<Observation>, StoreError>;
}

/// Count summary table
#[async_trait]
pub trait CountStore: Send + Sync {
    /// Upsert Original samples, overwriting whatever was there
    async fn upsert_original(&self, counts: &[(i64, u32)]) -> Result<usize, StoreError>;

    /// Write filled samples; Original rows are never overwritten
    async fn write_filled(&self, samples: &[CountSample]) -> Result<usize, StoreError>;

    /// Full series in bucket order
    async fn samples(&self) -> Result<Vec<CountSample>, StoreError>;

    /// Delete every sample with `bucket < cutoff`. Returns rows deleted.
    async fn delete_before(&self, cutoff: i64) -> Result<usize, StoreError>;
}

fn open_connection(db_path: &Path) -> Result<Connection, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(db_path)?;
    apply_optimized_pragmas(&conn)?;
    Ok(conn)
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock().map_err(|_| StoreError::Poisoned)
}

/// SQLite implementation of ObservationStore
pub struct SqliteObservationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteObservationStore {
    /// Open (and create if absent) the observation database
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = open_connection(db_path.as_ref())?;
        Self::with_connection(conn)
    }

    /// In-memory store for tests and dry runs
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(OBSERVATIONS_SCHEMA)?;
        log::debug!("✅ Observation store schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl ObservationStore for SqliteObservationStore {
    async fn insert_batch(
        &self,
        rows: &[Observation],
        upgrade_synthetic: bool,
    ) -> Result<InsertSummary, StoreError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let mut summary = InsertSummary::default();

        {
            let sql = if upgrade_synthetic {
                "INSERT INTO observations (bucket, address, origin) VALUES (?1, ?2, ?3)
                 ON CONFLICT(bucket, address) DO UPDATE SET origin = excluded.origin
                 WHERE excluded.origin = 'original' AND observations.origin = 'synthetic'"
            } else {
                "INSERT OR IGNORE INTO observations (bucket, address, origin) VALUES (?1, ?2, ?3)"
            };
            let mut stmt = tx.prepare(sql)?;

            for row in rows {
                let changed = stmt.execute(params![row.bucket, row.address, row.origin])?;
                match row.origin {
                    Origin::Original => summary.original += changed,
                    Origin::Synthetic => summary.synthetic += changed,
                }
            }
        }

        tx.commit()?;
        Ok(summary)
    }

    async fn fill_gaps(&self, width_secs: i64, max_gap_secs: i64) -> Result<usize, StoreError> {
        let conn = lock(&self.conn)?;

        // Pair each row with the same address's next bucket, keep the
        // bridgeable gaps, then walk each gap one bucket at a time.
        let inserted = conn.execute(
            r#"
            WITH RECURSIVE
            pairs AS (
                SELECT address,
                       bucket,
                       LEAD(bucket) OVER (PARTITION BY address ORDER BY bucket) AS next_bucket
                FROM observations
            ),
            gaps AS (
                SELECT address, bucket, next_bucket
                FROM pairs
                WHERE next_bucket IS NOT NULL
                  AND next_bucket - bucket > ?1
                  AND next_bucket - bucket <= ?2
            ),
            fill(address, bucket, next_bucket) AS (
                SELECT address, bucket + ?1, next_bucket FROM gaps
                UNION ALL
                SELECT address, bucket + ?1, next_bucket FROM fill
                WHERE bucket + ?1 < next_bucket
            )
            INSERT OR IGNORE INTO observations (bucket, address, origin)
            SELECT bucket, address, 'synthetic' FROM fill
            WHERE bucket < next_bucket
            "#,
            params![width_secs, max_gap_secs],
        )?;

        Ok(inserted)
    }

    async fn distinct_counts_before(&self, cutoff: i64) -> Result<Vec<(i64, u32)>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT bucket, COUNT(DISTINCT address)
             FROM observations
             WHERE bucket < ?1
             GROUP BY bucket
             ORDER BY bucket ASC",
        )?;

        let counts = stmt
            .query_map([cutoff], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<(i64, u32)>, _>>()?;

        Ok(counts)
    }

    async fn delete_before(&self, cutoff: i64) -> Result<usize, StoreError> {
        let conn = lock(&self.conn)?;
        let deleted = conn.execute("DELETE FROM observations WHERE bucket < ?1", [cutoff])?;
        Ok(deleted)
    }

    async fn observations(&self) -> Result<Vec<Observation>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT bucket, address, origin FROM observations ORDER BY bucket ASC, address ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(Observation {
                    bucket: row.get(0)?,
                    address: row.get(1)?,
                    origin: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

/// SQLite implementation of CountStore
pub struct SqliteCountStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCountStore {
    /// Open (and create if absent) the count database
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = open_connection(db_path.as_ref())?;
        Self::with_connection(conn)
    }

    /// In-memory store for tests and dry runs
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(COUNT_SAMPLES_SCHEMA)?;
        log::debug!("✅ Count store schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl CountStore for SqliteCountStore {
    async fn upsert_original(&self, counts: &[(i64, u32)]) -> Result<usize, StoreError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let mut written = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO count_samples (bucket, count, method) VALUES (?1, ?2, ?3)
                 ON CONFLICT(bucket) DO UPDATE SET
                    count = excluded.count,
                    method = excluded.method",
            )?;
            for (bucket, count) in counts {
                written += stmt.execute(params![bucket, count, CountMethod::Original])?;
            }
        }

        tx.commit()?;
        Ok(written)
    }

    async fn write_filled(&self, samples: &[CountSample]) -> Result<usize, StoreError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let mut written = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO count_samples (bucket, count, method) VALUES (?1, ?2, ?3)
                 ON CONFLICT(bucket) DO UPDATE SET
                    count = excluded.count,
                    method = excluded.method
                 WHERE count_samples.method != 'original'",
            )?;
            for sample in samples.iter().filter(|s| !s.is_original()) {
                written += stmt.execute(params![sample.bucket, sample.count, sample.method])?;
            }
        }

        tx.commit()?;
        Ok(written)
    }

    async fn samples(&self) -> Result<Vec<CountSample>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt =
            conn.prepare("SELECT bucket, count, method FROM count_samples ORDER BY bucket ASC")?;

        let samples = stmt
            .query_map([], |row| {
                Ok(CountSample {
                    bucket: row.get(0)?,
                    count: row.get(1)?,
                    method: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(samples)
    }

    async fn delete_before(&self, cutoff: i64) -> Result<usize, StoreError> {
        let conn = lock(&self.conn)?;
        let deleted = conn.execute("DELETE FROM count_samples WHERE bucket < ?1", [cutoff])?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const W: i64 = 1800;
    const T: i64 = 1_689_933_600; // 2023-07-21 10:00:00 UTC

    fn obs(bucket: i64, address: &str, origin: Origin) -> Observation {
        Observation::new(bucket, address, origin)
    }

    #[tokio::test]
    async fn test_duplicate_batch_is_noop() {
        let store = SqliteObservationStore::open_in_memory().unwrap();
        let batch = vec![obs(T, "a", Origin::Original), obs(T, "b", Origin::Original)];

        let first = store.insert_batch(&batch, true).await.unwrap();
        let second = store.insert_batch(&batch, true).await.unwrap();

        assert_eq!(first.original, 2);
        assert_eq!(second.total(), 0);
        assert_eq!(store.observations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_original_upgrades_synthetic() {
        let store = SqliteObservationStore::open_in_memory().unwrap();
        store
            .insert_batch(&[obs(T, "a", Origin::Synthetic)], true)
            .await
            .unwrap();

        let summary = store
            .insert_batch(&[obs(T, "a", Origin::Original)], true)
            .await
            .unwrap();

        assert_eq!(summary.original, 1);
        let rows = store.observations().await.unwrap();
        assert_eq!(rows, vec![obs(T, "a", Origin::Original)]);
    }

    #[tokio::test]
    async fn test_synthetic_never_downgrades_original() {
        let store = SqliteObservationStore::open_in_memory().unwrap();
        store
            .insert_batch(&[obs(T, "a", Origin::Original)], true)
            .await
            .unwrap();

        let summary = store
            .insert_batch(&[obs(T, "a", Origin::Synthetic)], true)
            .await
            .unwrap();

        assert_eq!(summary.total(), 0);
        assert_eq!(store.observations().await.unwrap()[0].origin, Origin::Original);
    }

    #[tokio::test]
    async fn test_upgrade_disabled_keeps_synthetic() {
        let store = SqliteObservationStore::open_in_memory().unwrap();
        store
            .insert_batch(&[obs(T, "a", Origin::Synthetic)], false)
            .await
            .unwrap();
        store
            .insert_batch(&[obs(T, "a", Origin::Original)], false)
            .await
            .unwrap();

        assert_eq!(store.observations().await.unwrap()[0].origin, Origin::Synthetic);
    }

    #[tokio::test]
    async fn test_fill_gaps_bridges_short_gap() {
        let store = SqliteObservationStore::open_in_memory().unwrap();
        store
            .insert_batch(
                &[obs(T, "a", Origin::Original), obs(T + 3 * W, "a", Origin::Original)],
                true,
            )
            .await
            .unwrap();

        let inserted = store.fill_gaps(W, 4 * W).await.unwrap();

        assert_eq!(inserted, 2);
        let buckets: Vec<i64> = store
            .observations()
            .await
            .unwrap()
            .iter()
            .map(|o| o.bucket)
            .collect();
        assert_eq!(buckets, vec![T, T + W, T + 2 * W, T + 3 * W]);
    }

    #[tokio::test]
    async fn test_fill_gaps_max_gap_is_inclusive() {
        let store = SqliteObservationStore::open_in_memory().unwrap();
        store
            .insert_batch(
                &[obs(T, "a", Origin::Original), obs(T + 4 * W, "a", Origin::Original)],
                true,
            )
            .await
            .unwrap();

        assert_eq!(store.fill_gaps(W, 4 * W).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_fill_gaps_leaves_long_gap_and_other_addresses() {
        let store = SqliteObservationStore::open_in_memory().unwrap();
        store
            .insert_batch(
                &[
                    obs(T, "a", Origin::Original),
                    obs(T + 5 * W, "a", Origin::Original),
                    // "b" next to "a" must not bridge a's gap
                    obs(T + 2 * W, "b", Origin::Original),
                    obs(T + 7 * W, "c", Origin::Original),
                ],
                true,
            )
            .await
            .unwrap();

        assert_eq!(store.fill_gaps(W, 4 * W).await.unwrap(), 0);
        assert_eq!(store.observations().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_fill_gaps_idempotent() {
        let store = SqliteObservationStore::open_in_memory().unwrap();
        store
            .insert_batch(
                &[obs(T, "a", Origin::Original), obs(T + 2 * W, "a", Origin::Original)],
                true,
            )
            .await
            .unwrap();

        assert_eq!(store.fill_gaps(W, 4 * W).await.unwrap(), 1);
        let after_first = store.observations().await.unwrap();
        assert_eq!(store.fill_gaps(W, 4 * W).await.unwrap(), 0);
        assert_eq!(store.observations().await.unwrap(), after_first);
        assert_eq!(after_first[1], obs(T + W, "a", Origin::Synthetic));
    }

    #[tokio::test]
    async fn test_distinct_counts_respect_cutoff() {
        let store = SqliteObservationStore::open_in_memory().unwrap();
        store
            .insert_batch(
                &[
                    obs(T, "a", Origin::Original),
                    obs(T, "b", Origin::Synthetic),
                    obs(T + W, "a", Origin::Original),
                ],
                true,
            )
            .await
            .unwrap();

        assert_eq!(store.distinct_counts_before(T + W).await.unwrap(), vec![(T, 2)]);
        assert_eq!(
            store.distinct_counts_before(T + 2 * W).await.unwrap(),
            vec![(T, 2), (T + W, 1)]
        );
    }

    #[tokio::test]
    async fn test_delete_before() {
        let store = SqliteObservationStore::open_in_memory().unwrap();
        store
            .insert_batch(
                &[obs(T, "a", Origin::Original), obs(T + W, "a", Origin::Original)],
                true,
            )
            .await
            .unwrap();

        assert_eq!(store.delete_before(T + W).await.unwrap(), 1);
        assert_eq!(store.observations().await.unwrap(), vec![obs(T + W, "a", Origin::Original)]);
    }

    #[tokio::test]
    async fn test_write_filled_never_overwrites_original() {
        let store = SqliteCountStore::open_in_memory().unwrap();
        store.upsert_original(&[(T, 5)]).await.unwrap();

        let written = store
            .write_filled(&[
                CountSample::new(T, 0, CountMethod::Zero),
                CountSample::new(T + W, 3, CountMethod::Interpolated),
            ])
            .await
            .unwrap();

        assert_eq!(written, 1);
        assert_eq!(
            store.samples().await.unwrap(),
            vec![
                CountSample::new(T, 5, CountMethod::Original),
                CountSample::new(T + W, 3, CountMethod::Interpolated),
            ]
        );
    }

    #[tokio::test]
    async fn test_original_overwrites_filled() {
        let store = SqliteCountStore::open_in_memory().unwrap();
        store
            .write_filled(&[CountSample::new(T, 0, CountMethod::Zero)])
            .await
            .unwrap();
        store.upsert_original(&[(T, 7)]).await.unwrap();

        assert_eq!(
            store.samples().await.unwrap(),
            vec![CountSample::new(T, 7, CountMethod::Original)]
        );
    }

    #[tokio::test]
    async fn test_stores_persist_across_reopen() {
        let dir = tempdir().unwrap();
        let mac_path = dir.path().join("nested").join("mac.db");
        let count_path = dir.path().join("count.db");

        {
            let observations = SqliteObservationStore::open(&mac_path).unwrap();
            observations
                .insert_batch(&[obs(T, "a", Origin::Original)], true)
                .await
                .unwrap();
            let counts = SqliteCountStore::open(&count_path).unwrap();
            counts.upsert_original(&[(T, 1)]).await.unwrap();
        }

        let observations = SqliteObservationStore::open(&mac_path).unwrap();
        let counts = SqliteCountStore::open(&count_path).unwrap();
        assert_eq!(observations.observations().await.unwrap().len(), 1);
        assert_eq!(counts.samples().await.unwrap().len(), 1);
    }
}
