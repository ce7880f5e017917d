//! Common test utilities for lintbox integration tests.
//!
//! Provides `TestEnv` for setting up isolated test environments with
//! database, workspace manager, runner, cache, and pipeline all wired
//! together, plus helpers for building archive payloads.

#![allow(dead_code)] // Test utilities may not all be used in every test file

use flate2::write::GzEncoder;
use flate2::Compression;
use lintbox::config::ServiceConfig;
use lintbox::db::Database;
use lintbox::server::AppState;
use lintbox::services::{
    CacheService, JobManager, LintPipeline, LinterRunner, WorkspaceManager,
};
use lintbox::types::{CacheStatus, ExecutionResult, LintOptions};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;

/// A complete test environment with all services wired together.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: ServiceConfig,
    pub db: Arc<Database>,
    pub workspaces: Arc<WorkspaceManager>,
    pub runner: Arc<LinterRunner>,
    pub cache: Arc<CacheService>,
    pub pipeline: Arc<LintPipeline>,
}

impl TestEnv {
    /// Creates a new environment with default quotas.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Creates an environment with adjusted configuration.
    pub fn with_config(adjust: impl FnOnce(&mut ServiceConfig)) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let mut config = ServiceConfig {
            workspace_base: dir.path().join("workspaces"),
            ..ServiceConfig::default()
        };
        adjust(&mut config);

        let db = Arc::new(Database::in_memory().expect("Failed to create in-memory database"));
        let workspaces =
            Arc::new(WorkspaceManager::new(&config).expect("Failed to create workspace manager"));
        let runner = Arc::new(LinterRunner::new(config.output_cap_bytes));
        let cache = Arc::new(CacheService::new(Arc::clone(&db), config.cache_ttl_hours));
        let pipeline = Arc::new(LintPipeline::new(
            Arc::clone(&workspaces),
            Arc::clone(&runner),
            Arc::clone(&cache),
        ));

        Self {
            dir,
            config,
            db,
            workspaces,
            runner,
            cache,
            pipeline,
        }
    }

    /// Starts a job manager over this environment's services.
    pub async fn jobs(&self, max_concurrent: usize, job_timeout_ms: u64) -> Arc<JobManager> {
        JobManager::new(
            Arc::clone(&self.db),
            Arc::clone(&self.pipeline),
            max_concurrent,
            job_timeout_ms,
        )
        .await
        .expect("Failed to start job manager")
    }

    /// Builds the HTTP router over this environment.
    pub async fn router(&self) -> axum::Router {
        let jobs = self.jobs(self.config.max_concurrent_jobs, self.config.job_timeout_ms).await;
        let state = Arc::new(AppState {
            db: Arc::clone(&self.db),
            pipeline: Arc::clone(&self.pipeline),
            jobs,
            config: self.config.clone(),
            started: Instant::now(),
        });
        lintbox::server::router(state)
    }

    /// Seeds a successful cache entry for (content, linter, options),
    /// as if a previous run completed.
    pub fn seed_cache(&self, content: &str, linter: &str, format: &str, options: &LintOptions) {
        let result = ExecutionResult {
            success: true,
            exit_code: 0,
            stdout: "[]".to_string(),
            stderr: String::new(),
            execution_time_ms: 7,
            parsed_output: serde_json::json!([]),
            file_count: 1,
            issues: vec![],
            output_truncated: false,
        };
        self.cache
            .set(
                &CacheService::generate_content_hash(content.as_bytes()),
                linter,
                format,
                &CacheService::generate_options_hash(options),
                serde_json::to_string(&result).unwrap(),
                CacheStatus::Success,
                None,
                None,
            )
            .expect("Failed to seed cache");
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a gzip-compressed tar archive from (path, content) pairs.
pub fn tar_gz(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        // `Header::set_path`/`Builder::append_data` reject `..` components, but
        // traversal tests need to build archives containing them, so the raw
        // GNU name field is written directly instead.
        let gnu = header.as_gnu_mut().expect("gnu header");
        gnu.name.fill(0);
        gnu.name[..path.len()].copy_from_slice(path.as_bytes());
        header.set_cksum();
        builder
            .append(&header, content.as_bytes())
            .expect("Failed to append archive entry");
    }
    builder
        .into_inner()
        .expect("Failed to finish archive")
        .finish()
        .expect("Failed to finish gzip stream")
}

/// Standard base64 of arbitrary bytes.
pub fn b64(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.encode(bytes)
}

/// Raw-deflate + URL-safe base64, the compressed-GET wire form.
pub fn deflate_b64(text: &str) -> String {
    use base64::{engine::general_purpose::URL_SAFE, Engine as _};
    let mut encoder = flate2::write::DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .expect("Failed to compress payload");
    URL_SAFE.encode(encoder.finish().expect("Failed to finish deflate stream"))
}
