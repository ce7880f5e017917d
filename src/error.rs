//! Error types for lintbox.
//!
//! Uses thiserror for ergonomic error handling with proper
//! error chain propagation. Every error maps to a machine-readable
//! code and an HTTP status for the transport layer.

use thiserror::Error;

/// Top-level API error.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Linter error: {0}")]
    Linter(#[from] LinterError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Linter '{linter}' does not support output format '{format}'")]
    UnsupportedFormat { linter: String, format: String },

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Persistent store errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),
}

/// Workspace provisioning errors.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Content size {size} exceeds limit of {limit} bytes")]
    ContentTooLarge { size: u64, limit: u64 },

    #[error("Decompressed archive exceeds limit of {limit} bytes")]
    ArchiveTooLarge { limit: u64 },

    #[error("Archive exceeds limit of {limit} files")]
    TooManyFiles { limit: usize },

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("Archive extraction failed: {0}")]
    Archive(String),

    #[error("Workspace not found: {path}")]
    NotFound { path: String },

    #[error("Workspace IO failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Linter execution errors.
#[derive(Error, Debug)]
pub enum LinterError {
    #[error("Unknown linter: {0}")]
    Unregistered(String),

    #[error("Linter executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("No supported files found for linter {0}")]
    NoSupportedFiles(String),

    #[error("Linter {linter} failed with exit code {exit_code}: {stderr}")]
    ExecutionFailed {
        linter: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Failed to spawn {linter}: {reason}")]
    Spawn { linter: String, reason: String },

    #[error("Linter {linter} exceeded timeout of {timeout_ms}ms")]
    Timeout { linter: String, timeout_ms: u64 },

    #[error("Linter {0} execution was cancelled")]
    Cancelled(String),
}

/// Cache service errors.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache persistence failure: {0}")]
    Persistence(String),
}

/// Job manager errors.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {0} is already in a terminal state")]
    AlreadyFinished(String),
}

/// Result type alias for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Result type alias for database operations.
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Result type alias for workspace operations.
pub type WorkspaceResult<T> = std::result::Result<T, WorkspaceError>;

/// Result type alias for linter execution.
pub type LinterResult<T> = std::result::Result<T, LinterError>;

/// Result type alias for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

// Error code implementations for machine-readable error responses
impl ApiError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Db(_) => "DATABASE_ERROR",
            Self::Workspace(e) => e.code(),
            Self::Linter(e) => e.code(),
            Self::Cache(_) => "CACHE_ERROR",
            Self::Job(e) => e.code(),
            Self::Io(_) => "INTERNAL_SERVER_ERROR",
            Self::Json(_) => "VALIDATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidParameters(_) => "INVALID_PARAMETERS",
            Self::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            Self::RateLimited(_) => "RATE_LIMIT_EXCEEDED",
            Self::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Returns the HTTP status code this error maps to.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Json(_) | Self::InvalidParameters(_) => 400,
            Self::UnsupportedFormat { .. } => 400,
            Self::Workspace(e) => e.http_status(),
            Self::Linter(e) => e.http_status(),
            Self::Job(e) => e.http_status(),
            Self::RateLimited(_) => 429,
            Self::Db(_) | Self::Cache(_) | Self::Io(_) | Self::Internal(_) => 500,
        }
    }
}

impl WorkspaceError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ContentTooLarge { .. } | Self::ArchiveTooLarge { .. } | Self::TooManyFiles { .. } => {
                "CONTENT_TOO_LARGE"
            }
            Self::InvalidBase64(_)
            | Self::Archive(_)
            | Self::NotFound { .. }
            | Self::Io(_) => "WORKSPACE_ERROR",
        }
    }

    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ContentTooLarge { .. } | Self::ArchiveTooLarge { .. } | Self::TooManyFiles { .. } => {
                413
            }
            _ => 422,
        }
    }
}

impl LinterError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unregistered(_) => "INVALID_PARAMETERS",
            Self::ExecutableNotFound(_) => "LINTER_NOT_FOUND",
            Self::NoSupportedFiles(_)
            | Self::ExecutionFailed { .. }
            | Self::Spawn { .. }
            | Self::Cancelled(_) => "LINTER_EXECUTION_FAILED",
            Self::Timeout { .. } => "TIMEOUT_ERROR",
        }
    }

    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unregistered(_) => 400,
            Self::Timeout { .. } => 408,
            _ => 422,
        }
    }
}

impl JobError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "JOB_NOT_FOUND",
            Self::AlreadyFinished(_) => "JOB_ALREADY_CANCELLED",
        }
    }

    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::AlreadyFinished(_) => 422,
        }
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_match_transport_contract() {
        let cases: Vec<(ApiError, &str, u16)> = vec![
            (
                ApiError::Validation("missing content".into()),
                "VALIDATION_ERROR",
                400,
            ),
            (
                ApiError::InvalidParameters("no such linter".into()),
                "INVALID_PARAMETERS",
                400,
            ),
            (
                ApiError::UnsupportedFormat {
                    linter: "flake8".into(),
                    format: "sarif".into(),
                },
                "UNSUPPORTED_FORMAT",
                400,
            ),
            (
                ApiError::Workspace(WorkspaceError::ContentTooLarge {
                    size: 20,
                    limit: 10,
                }),
                "CONTENT_TOO_LARGE",
                413,
            ),
            (
                ApiError::Linter(LinterError::ExecutableNotFound("eslint".into())),
                "LINTER_NOT_FOUND",
                422,
            ),
            (
                ApiError::Linter(LinterError::Timeout {
                    linter: "eslint".into(),
                    timeout_ms: 1000,
                }),
                "TIMEOUT_ERROR",
                408,
            ),
            (
                ApiError::Job(JobError::NotFound("job_1".into())),
                "JOB_NOT_FOUND",
                404,
            ),
            (
                ApiError::Job(JobError::AlreadyFinished("job_1".into())),
                "JOB_ALREADY_CANCELLED",
                422,
            ),
            (
                ApiError::Cache(CacheError::Persistence("disk full".into())),
                "CACHE_ERROR",
                500,
            ),
        ];

        for (err, code, status) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.http_status(), status);
        }
    }

    #[test]
    fn test_workspace_error_converts_to_api_error() {
        let err: ApiError = WorkspaceError::NotFound {
            path: "/tmp/ws".into(),
        }
        .into();
        assert_eq!(err.code(), "WORKSPACE_ERROR");
        assert_eq!(err.http_status(), 422);
    }
}
