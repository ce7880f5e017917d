//! HTTP transport over the linting pipeline.
//!
//! A thin axum layer: handlers validate route parameters, hand work to
//! the orchestrator/job manager, and wrap outcomes in the wire shapes.
//! Every response carries the standard error envelope on failure, and
//! a middleware appends one `api_metrics` record per request.

use crate::config::ServiceConfig;
use crate::db::Database;
use crate::error::{ApiError, JobError, Result};
use crate::services::{
    decode_compressed_payload, render_response, CacheService, JobManager, LintPipeline,
    LintRequestBody, LinterRegistry, Payload,
};
use crate::types::{MetricRecord, OutputFormat};
use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

/// Shared state behind every handler.
pub struct AppState {
    pub db: Arc<Database>,
    pub pipeline: Arc<LintPipeline>,
    pub jobs: Arc<JobManager>,
    pub config: ServiceConfig,
    pub started: Instant,
}

impl AppState {
    fn cache(&self) -> &Arc<CacheService> {
        self.pipeline.cache()
    }
}

/// Builds the service router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/linters", get(linters))
        .route("/cache", delete(clear_cache))
        .route("/jobs/{job_id}", get(job_status).delete(job_cancel))
        .route("/{linter}/{format}", post(lint_sync))
        .route("/{linter}/{format}/async", post(lint_async))
        .route("/{linter}/{format}/{encoded}", get(lint_compressed))
        .fallback(unknown_route)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            track_metrics,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Error envelope ──────────────────────────────────────────────────────────

/// Machine-readable error code, stashed on the response for metrics.
#[derive(Debug, Clone, Copy)]
struct ErrorCode(&'static str);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = self.code();

        if status.is_server_error() {
            tracing::error!(code, error = %self, "request failed");
        } else {
            tracing::debug!(code, error = %self, "request rejected");
        }

        let body = json!({
            "success": false,
            "error": {
                "code": code,
                "message": self.to_string(),
                "timestamp": Utc::now().to_rfc3339(),
            },
        });
        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(ErrorCode(code));
        response
    }
}

// ─── Metrics middleware ──────────────────────────────────────────────────────

/// Per-request context handlers attach for the audit record.
#[derive(Debug, Clone, Default)]
struct MetricMeta {
    cache_hit: bool,
    linter: Option<String>,
    format: Option<String>,
}

async fn track_metrics(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let endpoint = request.uri().path().to_string();

    let response = next.run(request).await;

    let meta = response
        .extensions()
        .get::<MetricMeta>()
        .cloned()
        .unwrap_or_default();
    let record = MetricRecord {
        endpoint,
        method,
        status_code: response.status().as_u16(),
        response_time_ms: started.elapsed().as_millis() as u64,
        cache_hit: meta.cache_hit,
        linter_type: meta.linter,
        format: meta.format,
        error_type: response
            .extensions()
            .get::<ErrorCode>()
            .map(|c| c.0.to_string()),
        created_at: Utc::now(),
    };

    // Audit writes never fail a request
    let db = Arc::clone(&state.db);
    tokio::task::spawn_blocking(move || {
        if let Err(e) = db.insert_metric(&record) {
            tracing::warn!(error = %e, "failed to record request metric");
        }
    });

    response
}

// ─── Lint endpoints ──────────────────────────────────────────────────────────

/// Decodes a request body: a JSON object, or raw text treated as
/// `content`.
fn decode_body(body: &Bytes) -> Result<LintRequestBody> {
    if body.is_empty() {
        return Ok(LintRequestBody::default());
    }
    if let Ok(parsed) = serde_json::from_slice::<LintRequestBody>(body) {
        return Ok(parsed);
    }
    let text = std::str::from_utf8(body)
        .map_err(|_| ApiError::Validation("request body is neither JSON nor UTF-8 text".into()))?;
    Ok(LintRequestBody {
        content: Some(text.to_string()),
        ..LintRequestBody::default()
    })
}

fn with_meta(mut response: Response, linter: &str, format: OutputFormat, cache_hit: bool) -> Response {
    response.extensions_mut().insert(MetricMeta {
        cache_hit,
        linter: Some(linter.to_string()),
        format: Some(format.as_str().to_string()),
    });
    response
}

async fn lint_sync(
    State(state): State<Arc<AppState>>,
    Path((linter, format)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response> {
    let (_, format) = LintPipeline::validate_request(&linter, &format)?;
    let (payload, options) = Payload::from_body(decode_body(&body)?)?;

    let outcome = state
        .pipeline
        .execute(&linter, format, &payload, &options, None)
        .await?;

    let rendered = render_response(&linter, format, &outcome);
    Ok(with_meta(
        Json(rendered).into_response(),
        &linter,
        format,
        outcome.cache_hit,
    ))
}

async fn lint_compressed(
    State(state): State<Arc<AppState>>,
    Path((linter, format, encoded)): Path<(String, String, String)>,
) -> Result<Response> {
    let (_, format) = LintPipeline::validate_request(&linter, &format)?;
    let content = decode_compressed_payload(&encoded, state.config.max_file_bytes)?;
    let payload = Payload::Text {
        content,
        filename: None,
    };

    let outcome = state
        .pipeline
        .execute(&linter, format, &payload, &Default::default(), None)
        .await?;

    let rendered = render_response(&linter, format, &outcome);
    Ok(with_meta(
        Json(rendered).into_response(),
        &linter,
        format,
        outcome.cache_hit,
    ))
}

async fn lint_async(
    State(state): State<Arc<AppState>>,
    Path((linter, format)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response> {
    let (_, format) = LintPipeline::validate_request(&linter, &format)?;
    let (payload, options) = Payload::from_body(decode_body(&body)?)?;

    let job_id = state
        .jobs
        .submit_job(&linter, format, &payload, &options)
        .await?;

    let body = json!({
        "success": true,
        "job_id": job_id,
        "status": "pending",
        "status_url": format!("/jobs/{job_id}"),
        "cancel_url": format!("/jobs/{job_id}"),
    });
    Ok(with_meta(
        (StatusCode::ACCEPTED, Json(body)).into_response(),
        &linter,
        format,
        false,
    ))
}

// ─── Job endpoints ───────────────────────────────────────────────────────────

async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Response> {
    let job = state
        .jobs
        .get_job_status(&job_id)
        .await?
        .ok_or(JobError::NotFound(job_id))?;
    Ok(Json(job).into_response())
}

async fn job_cancel(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Response> {
    let cancelled = state.jobs.cancel_job(&job_id).await?;
    if !cancelled {
        return Err(JobError::AlreadyFinished(job_id).into());
    }
    Ok(Json(json!({ "success": true, "job_id": job_id, "status": "cancelled" })).into_response())
}

// ─── Introspection endpoints ─────────────────────────────────────────────────

async fn linters(State(state): State<Arc<AppState>>) -> Response {
    let availability = state.pipeline.runner().get_all_linter_status().await;

    let linters: Vec<_> = LinterRegistry::all()
        .iter()
        .map(|descriptor| {
            let probe = availability.iter().find(|a| a.name == descriptor.name);
            json!({
                "name": descriptor.name,
                "available": probe.is_some_and(|p| p.available),
                "version": probe.and_then(|p| p.version.clone()),
                "extensions": descriptor.extensions,
                "formats": descriptor.formats,
            })
        })
        .collect();

    Json(json!({ "success": true, "linters": linters })).into_response()
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let db_ok = {
        let db = Arc::clone(&state.db);
        tokio::task::spawn_blocking(move || db.ping().is_ok())
            .await
            .unwrap_or(false)
    };

    let fs_ok = {
        let base = state.pipeline.workspaces().base_dir().to_path_buf();
        tokio::task::spawn_blocking(move || {
            let probe = base.join(".health_probe");
            std::fs::write(&probe, b"ok").and_then(|()| std::fs::remove_file(&probe)).is_ok()
        })
        .await
        .unwrap_or(false)
    };

    let availability = state.pipeline.runner().get_all_linter_status().await;
    let available: Vec<&str> = availability
        .iter()
        .filter(|a| a.available)
        .map(|a| a.name.as_str())
        .collect();

    let healthy = db_ok && fs_ok;
    let body = json!({
        "status": if healthy { "ok" } else { "unhealthy" },
        "checks": {
            "database": if db_ok { "ok" } else { "failed" },
            "filesystem": if fs_ok { "ok" } else { "failed" },
            "linters": if available.is_empty() { "degraded" } else { "ok" },
        },
        "linters": {
            "total": availability.len(),
            "available_count": available.len(),
            "available": available,
        },
        "uptime_ms": state.started.elapsed().as_millis() as u64,
    });

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<Response> {
    let cache_stats = {
        let cache = Arc::clone(state.cache());
        tokio::task::spawn_blocking(move || cache.get_stats())
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))??
    };
    let hit_miss = state.cache().get_hit_miss_stats();
    let job_stats = state.jobs.get_job_stats().await?;
    let running = state.jobs.get_running_jobs().await?;

    Ok(Json(json!({
        "cache": {
            "stats": cache_stats,
            "hits": hit_miss.hits,
            "misses": hit_miss.misses,
        },
        "jobs": job_stats,
        "running_jobs": running,
        "process": {
            "memory_mb": process_memory_mb(),
            "uptime_ms": state.started.elapsed().as_millis() as u64,
        },
    }))
    .into_response())
}

async fn clear_cache(State(state): State<Arc<AppState>>) -> Result<Response> {
    let invalidated = {
        let cache = Arc::clone(state.cache());
        tokio::task::spawn_blocking(move || cache.invalidate(None, None))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))??
    };
    Ok(Json(json!({ "success": true, "invalidated": invalidated })).into_response())
}

async fn unknown_route() -> Response {
    ApiError::InvalidParameters("unsupported route".to_string()).into_response()
}

/// Resident set size of this process, in megabytes.
fn process_memory_mb() -> f64 {
    #[cfg(unix)]
    {
        use std::process::Command;
        Command::new("ps")
            .args(["-o", "rss=", "-p", &std::process::id().to_string()])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|kb| kb as f64 / 1024.0)
            .unwrap_or(0.0)
    }
    #[cfg(not(unix))]
    {
        0.0
    }
}
