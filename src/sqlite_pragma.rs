//! Connection PRAGMAs shared by both presence stores

use rusqlite::Connection;
use std::time::Duration;

/// How long a writer waits on a locked database before giving up
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Apply the PRAGMA set every store connection runs with
///
/// - WAL journal (parallel capture workers read while one writes)
/// - synchronous=NORMAL (safe under WAL)
/// - temp_store=MEMORY
/// - wal_autocheckpoint=1000 pages
/// - busy timeout so concurrent ingestion batches queue instead of failing
///
/// In-memory databases silently keep their `memory` journal mode.
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "wal_autocheckpoint", 1000)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}
