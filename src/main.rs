//! lintbox: HTTP API for running code linters against isolated workspaces.
//!
//! Usage:
//!   lintbox --port 8080                 # Start the HTTP server
//!   lintbox --base-dir /tmp/lint-ws     # Custom workspace base
//!   lintbox --cache-cleanup-secs 300    # Enable periodic cache sweeps

use anyhow::Context;
use clap::Parser;
use lintbox::config::ServiceConfig;
use lintbox::db::Database;
use lintbox::server::{self, AppState};
use lintbox::services::{CacheService, CleanupTask, JobManager, LintPipeline, LinterRunner, WorkspaceManager};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lintbox")]
#[command(about = "HTTP API for running code linters against isolated workspaces")]
#[command(version)]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Base directory for per-request workspaces
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Database path (default: <data_dir>/lintbox/lintbox.db)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Maximum concurrent asynchronous jobs
    #[arg(long, default_value = "4")]
    max_concurrent_jobs: usize,

    /// Cache entry lifetime in hours
    #[arg(long, default_value = "24")]
    cache_ttl_hours: i64,

    /// Periodic cache cleanup interval in seconds (disabled when absent)
    #[arg(long)]
    cache_cleanup_secs: Option<u64>,

    /// Per-job timeout in milliseconds
    #[arg(long, default_value = "300000")]
    job_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lintbox=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let mut config = ServiceConfig {
        port: cli.port,
        db_path: cli.db,
        max_concurrent_jobs: cli.max_concurrent_jobs,
        cache_ttl_hours: cli.cache_ttl_hours,
        cache_cleanup_interval_secs: cli.cache_cleanup_secs,
        job_timeout_ms: cli.job_timeout_ms,
        ..ServiceConfig::default()
    };
    if let Some(base) = cli.base_dir {
        config.workspace_base = base;
    }

    // Persistent store
    let db_path = config.db_path.clone().unwrap_or_else(lintbox::default_db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }
    let db = Arc::new(Database::open(&db_path).context("opening database")?);
    tracing::info!(path = %db_path.display(), "database ready");

    // Services
    let workspaces =
        Arc::new(WorkspaceManager::new(&config).context("initializing workspace base")?);
    let runner = Arc::new(LinterRunner::new(config.output_cap_bytes));
    let cache = Arc::new(CacheService::new(Arc::clone(&db), config.cache_ttl_hours));
    let pipeline = Arc::new(LintPipeline::new(
        Arc::clone(&workspaces),
        Arc::clone(&runner),
        Arc::clone(&cache),
    ));
    let jobs = JobManager::new(
        Arc::clone(&db),
        Arc::clone(&pipeline),
        config.max_concurrent_jobs,
        config.job_timeout_ms,
    )
    .await
    .context("starting job manager")?;

    // Optional background cache sweeper
    let cleanup_task = config
        .cache_cleanup_interval_secs
        .map(|secs| CleanupTask::spawn(Arc::clone(&cache), Duration::from_secs(secs)));

    // Sweep workspaces abandoned by a previous process
    match workspaces.cleanup_expired() {
        Ok(0) => {}
        Ok(removed) => tracing::info!(removed, "removed expired workspaces"),
        Err(e) => tracing::warn!(error = %e, "startup workspace sweep failed"),
    }

    let state = Arc::new(AppState {
        db,
        pipeline,
        jobs,
        config: config.clone(),
        started: Instant::now(),
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    tracing::info!(port = config.port, "lintbox listening");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    // Stop the cleanup timer before exit
    if let Some(task) = cleanup_task {
        task.stop().await;
    }
    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received");
}
