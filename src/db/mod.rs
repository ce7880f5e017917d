//! Database layer with connection pooling.
//!
//! Three tables back the service: `lint_results` (cache entries),
//! `lint_jobs` (durable job records), and `api_metrics` (append-only
//! audit trail). All queries are typed here; services never touch SQL.

pub(crate) mod pragmas;
mod schema;

pub use pragmas::apply_pragmas;
pub use schema::{init_schema, SCHEMA_VERSION};

use crate::error::{DbError, DbResult};
use crate::types::{CacheEntry, CacheStatus, JobRecord, JobStatus, MetricRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::Row;
use std::path::Path;

/// Formats a timestamp for storage.
///
/// Fixed-width millisecond RFC3339 with a `Z` suffix, so string
/// comparison in SQL orders the same way the timestamps do.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn parse_opt_ts(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

/// Aggregated job counts by state.
///
/// `completed` and `failed` are windowed (last 24h by default); the
/// pending count doubles as the observable queue length.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct JobCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// Database handle with connection pooling.
///
/// Uses r2d2 because `rusqlite::Connection` is NOT Sync.
/// The pool manages thread-safe access to `SQLite` connections.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Opens or creates a database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Pool` if connection pool creation fails.
    /// Returns `DbError::Sqlite` if schema initialization fails.
    pub fn open(path: &Path) -> DbResult<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(8)
            .min_idle(Some(1))
            .build(manager)?;

        // Initialize schema on first connection
        {
            let conn = pool.get()?;
            apply_pragmas(&conn)?;
            init_schema(&conn)?;
        }

        Ok(Self { pool })
    }

    /// Creates an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns `DbError::Pool` if connection pool creation fails.
    /// Returns `DbError::Sqlite` if schema initialization fails.
    pub fn in_memory() -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;

        {
            let conn = pool.get()?;
            apply_pragmas(&conn)?;
            init_schema(&conn)?;
        }

        Ok(Self { pool })
    }

    /// Gets a connection from the pool.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Pool` if no connection is available within the timeout.
    pub fn conn(&self) -> DbResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(DbError::from)
    }

    /// Cheap liveness probe for health checks.
    pub fn ping(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // lint_results
    // ------------------------------------------------------------------

    /// Inserts a cache entry and returns its row id.
    pub fn insert_result(&self, entry: &CacheEntry) -> DbResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO lint_results
                (content_hash, linter_type, options_hash, result, format,
                 status, error_message, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
            rusqlite::params![
                entry.content_hash,
                entry.linter_type,
                entry.options_hash,
                entry.result,
                entry.format,
                entry.status.as_str(),
                entry.error_message,
                fmt_ts(entry.created_at),
                fmt_ts(entry.expires_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Returns the freshest non-expired entry for the composite key,
    /// or `None`.
    pub fn freshest_result(
        &self,
        content_hash: &str,
        linter_type: &str,
        options_hash: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Option<CacheEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            r"
            SELECT id, content_hash, linter_type, options_hash, result,
                   format, status, error_message, created_at, expires_at
            FROM lint_results
            WHERE content_hash = ?1 AND linter_type = ?2 AND options_hash = ?3
              AND expires_at > ?4
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            ",
        )?;

        let result = stmt.query_row(
            rusqlite::params![content_hash, linter_type, options_hash, fmt_ts(now)],
            entry_from_row,
        );

        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::Sqlite(e)),
        }
    }

    /// Deletes expired entries, returning how many were removed.
    pub fn delete_expired_results(&self, now: DateTime<Utc>) -> DbResult<usize> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM lint_results WHERE expires_at <= ?1",
            rusqlite::params![fmt_ts(now)],
        )?;
        Ok(rows)
    }

    /// Removes entries matching the given filters; `None` broadens the scope.
    pub fn invalidate_results(
        &self,
        content_hash: Option<&str>,
        linter_type: Option<&str>,
    ) -> DbResult<usize> {
        let conn = self.conn()?;
        let rows = match (content_hash, linter_type) {
            (Some(ch), Some(lt)) => conn.execute(
                "DELETE FROM lint_results WHERE content_hash = ?1 AND linter_type = ?2",
                rusqlite::params![ch, lt],
            )?,
            (Some(ch), None) => conn.execute(
                "DELETE FROM lint_results WHERE content_hash = ?1",
                rusqlite::params![ch],
            )?,
            (None, Some(lt)) => conn.execute(
                "DELETE FROM lint_results WHERE linter_type = ?1",
                rusqlite::params![lt],
            )?,
            (None, None) => conn.execute("DELETE FROM lint_results", [])?,
        };
        Ok(rows)
    }

    /// Total cache entries, including expired ones not yet swept.
    pub fn result_count(&self) -> DbResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM lint_results", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Entries past their expiry that `cleanup` would remove.
    pub fn expired_result_count(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM lint_results WHERE expires_at <= ?1",
            rusqlite::params![fmt_ts(now)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Approximate database size in megabytes (`page_count * page_size`).
    pub fn size_mb(&self) -> DbResult<f64> {
        let conn = self.conn()?;
        let pages: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((pages * page_size) as f64 / (1024.0 * 1024.0))
    }

    // ------------------------------------------------------------------
    // lint_jobs
    // ------------------------------------------------------------------

    /// Persists a new job record.
    pub fn insert_job(&self, job: &JobRecord) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO lint_jobs
                (job_id, linter_type, format, content, archive, filename,
                 options, status, result, error_message, execution_time_ms,
                 created_at, started_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ",
            rusqlite::params![
                job.job_id.as_str(),
                job.linter_type,
                job.format,
                job.content,
                job.archive,
                job.filename,
                job.options,
                job.status.as_str(),
                job.result,
                job.error_message,
                job.execution_time_ms.map(|v| v as i64),
                fmt_ts(job.created_at),
                job.started_at.map(fmt_ts),
                job.completed_at.map(fmt_ts),
            ],
        )?;
        Ok(())
    }

    /// Fetches a job by id.
    pub fn get_job(&self, job_id: &str) -> DbResult<Option<JobRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            r"
            SELECT job_id, linter_type, format, content, archive, filename,
                   options, status, result, error_message, execution_time_ms,
                   created_at, started_at, completed_at
            FROM lint_jobs WHERE job_id = ?1
            ",
        )?;
        let result = stmt.query_row(rusqlite::params![job_id], job_from_row);
        match result {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::Sqlite(e)),
        }
    }

    /// Transitions a pending job to running. Returns false when the job
    /// was no longer pending (raced with a cancel).
    pub fn mark_job_running(&self, job_id: &str, started_at: DateTime<Utc>) -> DbResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            r"
            UPDATE lint_jobs SET status = 'running', started_at = ?2
            WHERE job_id = ?1 AND status = 'pending'
            ",
            rusqlite::params![job_id, fmt_ts(started_at)],
        )?;
        Ok(rows > 0)
    }

    /// Applies a terminal transition. The guard keeps terminal states
    /// immutable: rows already completed/failed/cancelled never match.
    #[allow(clippy::too_many_arguments)]
    pub fn finish_job(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<&str>,
        error_message: Option<&str>,
        execution_time_ms: Option<u64>,
        completed_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        debug_assert!(status.is_terminal());
        let conn = self.conn()?;
        let rows = conn.execute(
            r"
            UPDATE lint_jobs
            SET status = ?2, result = ?3, error_message = ?4,
                execution_time_ms = ?5, completed_at = ?6
            WHERE job_id = ?1 AND status IN ('pending', 'running')
            ",
            rusqlite::params![
                job_id,
                status.as_str(),
                result,
                error_message,
                execution_time_ms.map(|v| v as i64),
                fmt_ts(completed_at),
            ],
        )?;
        Ok(rows > 0)
    }

    /// Cancels a job only if it is still pending (never started).
    pub fn cancel_job_if_pending(
        &self,
        job_id: &str,
        completed_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            r"
            UPDATE lint_jobs SET status = 'cancelled', completed_at = ?2
            WHERE job_id = ?1 AND status = 'pending'
            ",
            rusqlite::params![job_id, fmt_ts(completed_at)],
        )?;
        Ok(rows > 0)
    }

    /// All pending jobs in dispatch order: `created_at`, then `job_id`.
    pub fn pending_jobs(&self) -> DbResult<Vec<JobRecord>> {
        self.jobs_with_status("pending")
    }

    /// Snapshot of currently running jobs.
    pub fn running_jobs(&self) -> DbResult<Vec<JobRecord>> {
        self.jobs_with_status("running")
    }

    fn jobs_with_status(&self, status: &str) -> DbResult<Vec<JobRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            r"
            SELECT job_id, linter_type, format, content, archive, filename,
                   options, status, result, error_message, execution_time_ms,
                   created_at, started_at, completed_at
            FROM lint_jobs WHERE status = ?1
            ORDER BY created_at ASC, job_id ASC
            ",
        )?;
        let jobs = stmt
            .query_map(rusqlite::params![status], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Counts jobs by state. Completed and failed are restricted to the
    /// window ending now; pending/running/cancelled are absolute.
    pub fn job_counts(&self, window: chrono::Duration, now: DateTime<Utc>) -> DbResult<JobCounts> {
        let conn = self.conn()?;
        let since = fmt_ts(now - window);

        let mut counts = JobCounts::default();
        let mut stmt = conn.prepare_cached(
            r"
            SELECT status, COUNT(*) FROM lint_jobs
            WHERE status IN ('pending', 'running', 'cancelled')
               OR (status IN ('completed', 'failed') AND completed_at >= ?1)
            GROUP BY status
            ",
        )?;
        let rows = stmt.query_map(rusqlite::params![since], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            let count = count as u64;
            match status.as_str() {
                "pending" => counts.pending = count,
                "running" => counts.running = count,
                "completed" => counts.completed = count,
                "failed" => counts.failed = count,
                "cancelled" => counts.cancelled = count,
                _ => {}
            }
        }
        Ok(counts)
    }

    /// Fails jobs stuck in `running` since before `cutoff` (crashed
    /// workers from a previous process). Returns how many were marked.
    pub fn fail_orphaned_jobs(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DbResult<usize> {
        let conn = self.conn()?;
        let rows = conn.execute(
            r"
            UPDATE lint_jobs
            SET status = 'failed',
                error_message = 'orphaned: job was running when the service restarted',
                completed_at = ?2
            WHERE status = 'running' AND started_at < ?1
            ",
            rusqlite::params![fmt_ts(cutoff), fmt_ts(now)],
        )?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // api_metrics
    // ------------------------------------------------------------------

    /// Appends one request record to the audit trail.
    pub fn insert_metric(&self, metric: &MetricRecord) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO api_metrics
                (endpoint, method, status_code, response_time_ms, cache_hit,
                 linter_type, format, error_type, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
            rusqlite::params![
                metric.endpoint,
                metric.method,
                metric.status_code as i64,
                metric.response_time_ms as i64,
                metric.cache_hit as i64,
                metric.linter_type,
                metric.format,
                metric.error_type,
                fmt_ts(metric.created_at),
            ],
        )?;
        Ok(())
    }

    /// Requests recorded since the given instant.
    pub fn metric_count_since(&self, since: DateTime<Utc>) -> DbResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM api_metrics WHERE created_at >= ?1",
            rusqlite::params![fmt_ts(since)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CacheEntry> {
    let status: String = row.get(6)?;
    Ok(CacheEntry {
        id: row.get(0)?,
        content_hash: row.get(1)?,
        linter_type: row.get(2)?,
        options_hash: row.get(3)?,
        result: row.get(4)?,
        format: row.get(5)?,
        status: status
            .parse::<CacheStatus>()
            .map_err(|_| rusqlite::Error::InvalidColumnType(6, "status".into(), Type::Text))?,
        error_message: row.get(7)?,
        created_at: parse_ts(&row.get::<_, String>(8)?)?,
        expires_at: parse_ts(&row.get::<_, String>(9)?)?,
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let status: String = row.get(7)?;
    Ok(JobRecord {
        job_id: row.get::<_, String>(0)?.into(),
        linter_type: row.get(1)?,
        format: row.get(2)?,
        content: row.get(3)?,
        archive: row.get(4)?,
        filename: row.get(5)?,
        options: row.get(6)?,
        status: status
            .parse::<JobStatus>()
            .map_err(|_| rusqlite::Error::InvalidColumnType(7, "status".into(), Type::Text))?,
        result: row.get(8)?,
        error_message: row.get(9)?,
        execution_time_ms: row.get::<_, Option<i64>>(10)?.map(|v| v as u64),
        created_at: parse_ts(&row.get::<_, String>(11)?)?,
        started_at: parse_opt_ts(row.get(12)?)?,
        completed_at: parse_opt_ts(row.get(13)?)?,
    })
}
