//! Service configuration.
//!
//! Every quota and interval the services consult lives here, with
//! defaults suitable for a small deployment. `main.rs` overrides
//! fields from CLI flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tunable knobs for the whole service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// TCP port the HTTP server binds.
    pub port: u16,
    /// Base directory under which per-request workspaces are created.
    pub workspace_base: PathBuf,
    /// SQLite database path. `None` selects the per-user default.
    pub db_path: Option<PathBuf>,
    /// Single-file submission quota in bytes.
    pub max_file_bytes: u64,
    /// Decompressed archive quota in bytes, enforced progressively.
    pub max_archive_bytes: u64,
    /// Maximum admissible files per workspace.
    pub max_workspace_files: usize,
    /// Default cache entry lifetime.
    pub cache_ttl_hours: i64,
    /// Background cache-cleanup interval. `None` disables the timer.
    pub cache_cleanup_interval_secs: Option<u64>,
    /// Worker pool size for asynchronous jobs.
    pub max_concurrent_jobs: usize,
    /// Upper bound on a single job, always >= any linter timeout.
    pub job_timeout_ms: u64,
    /// Age after which an abandoned workspace is removed by `cleanup_expired`.
    pub workspace_max_age_secs: u64,
    /// Per-stream capture cap for child stdout/stderr.
    pub output_cap_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            workspace_base: std::env::temp_dir().join("lintbox-workspaces"),
            db_path: None,
            max_file_bytes: 10 * 1024 * 1024,
            max_archive_bytes: 500 * 1024 * 1024,
            max_workspace_files: 1000,
            cache_ttl_hours: 24,
            cache_cleanup_interval_secs: None,
            max_concurrent_jobs: 4,
            job_timeout_ms: 300_000,
            workspace_max_age_secs: 3600,
            output_cap_bytes: 1024 * 1024,
        }
    }
}
