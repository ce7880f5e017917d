//! `SQLite` PRAGMA configuration.

use crate::error::DbResult;
use rusqlite::Connection;

/// Applies performance-tuned PRAGMA settings.
///
/// These settings optimize for:
/// - Concurrent reads while job workers write (WAL mode)
/// - Lock contention between workers (busy timeout)
/// - Small result rows read often (page cache)
///
/// # Errors
///
/// Returns `DbError::Sqlite` if any PRAGMA statement fails.
pub fn apply_pragmas(conn: &Connection) -> DbResult<()> {
    // Use prepare + step pattern which handles both void and result-returning statements

    // WAL mode enables concurrent readers during writes
    conn.prepare("PRAGMA journal_mode = WAL")?
        .query([])?
        .next()?;

    // Synchronous NORMAL is safe with WAL, faster than FULL
    conn.prepare("PRAGMA synchronous = NORMAL")?
        .query([])?
        .next()?;

    // 4MB page cache
    conn.prepare("PRAGMA cache_size = -4000")?
        .query([])?
        .next()?;

    // 5 second busy timeout for lock contention
    conn.prepare("PRAGMA busy_timeout = 5000")?
        .query([])?
        .next()?;

    // Temp tables in memory
    conn.prepare("PRAGMA temp_store = MEMORY")?
        .query([])?
        .next()?;

    Ok(())
}
