//! Database schema definitions.

use crate::error::DbResult;
use rusqlite::Connection;

/// Current schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;

/// Initializes the database schema.
///
/// Handles schema versioning - if an older schema version exists,
/// drops all tables and recreates them with the new schema.
///
/// # Errors
///
/// Returns `DbError::Sqlite` if schema creation fails.
pub fn init_schema(conn: &Connection) -> DbResult<()> {
    // Check existing schema version
    let existing_version: Option<u32> = conn
        .query_row(
            "SELECT CAST(value AS INTEGER) FROM schema_info WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .ok();

    match existing_version {
        Some(v) if v >= SCHEMA_VERSION => return Ok(()), // Already up to date
        Some(_) => {
            // Old version - drop everything and recreate
            conn.execute_batch(
                r"
                DROP TABLE IF EXISTS lint_results;
                DROP TABLE IF EXISTS lint_jobs;
                DROP TABLE IF EXISTS api_metrics;
                DROP TABLE IF EXISTS schema_info;
                ",
            )?;
        }
        None => {} // Fresh database
    }

    conn.execute_batch(
        r"
        -- Cached lint results, keyed by content + linter + options
        CREATE TABLE IF NOT EXISTS lint_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content_hash TEXT NOT NULL,
            linter_type TEXT NOT NULL,
            options_hash TEXT NOT NULL,
            result TEXT NOT NULL,
            format TEXT NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_results_key
            ON lint_results(content_hash, linter_type, options_hash);
        CREATE INDEX IF NOT EXISTS idx_results_expires ON lint_results(expires_at);

        -- Durable records of asynchronous lint jobs
        CREATE TABLE IF NOT EXISTS lint_jobs (
            job_id TEXT PRIMARY KEY,
            linter_type TEXT NOT NULL,
            format TEXT NOT NULL,
            content TEXT,
            archive TEXT,
            filename TEXT,
            options TEXT NOT NULL,
            status TEXT NOT NULL,
            result TEXT,
            error_message TEXT,
            execution_time_ms INTEGER,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        ) WITHOUT ROWID;

        CREATE INDEX IF NOT EXISTS idx_jobs_status ON lint_jobs(status);
        CREATE INDEX IF NOT EXISTS idx_jobs_created ON lint_jobs(created_at);

        -- Append-only request audit trail
        CREATE TABLE IF NOT EXISTS api_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            endpoint TEXT NOT NULL,
            method TEXT NOT NULL,
            status_code INTEGER NOT NULL,
            response_time_ms INTEGER NOT NULL,
            cache_hit INTEGER NOT NULL DEFAULT 0,
            linter_type TEXT,
            format TEXT,
            error_type TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_metrics_created ON api_metrics(created_at);

        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        ) WITHOUT ROWID;

        INSERT OR REPLACE INTO schema_info (key, value)
        VALUES ('version', '1');
        ",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pragmas::apply_pragmas;

    #[test]
    fn test_schema_creation() {
        let conn = Connection::open_in_memory().unwrap();
        apply_pragmas(&conn).unwrap();
        init_schema(&conn).unwrap();

        // Verify tables exist
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(Result::ok)
            .collect();

        assert!(tables.contains(&"lint_results".to_string()));
        assert!(tables.contains(&"lint_jobs".to_string()));
        assert!(tables.contains(&"api_metrics".to_string()));
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_pragmas(&conn).unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }
}
