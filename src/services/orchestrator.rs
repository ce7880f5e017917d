//! Per-request pipeline glue.
//!
//! One path serves both transports: validate linter and format against
//! the registry, derive the content and options hashes, consult the
//! cache, and on a miss provision a workspace, drive the runner, write
//! the outcome back to the cache, and clean the workspace up. Cleanup
//! runs on every exit path.

use crate::error::{ApiError, LinterError, Result, WorkspaceError};
use crate::services::cache::CacheService;
use crate::services::registry::{LinterDescriptor, LinterRegistry};
use crate::services::runner::LinterRunner;
use crate::services::workspace::WorkspaceManager;
use crate::types::{
    CacheStatus, ExecutionRequest, ExecutionResult, LintOptions, OutputFormat, ProcessId,
};
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Read;
use std::sync::Arc;

/// JSON body accepted by the lint endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LintRequestBody {
    pub content: Option<String>,
    pub filename: Option<String>,
    /// Base64-encoded gzip'd tar archive.
    pub archive: Option<String>,
    pub options: Option<LintOptions>,
}

/// What the client actually submitted.
#[derive(Debug, Clone)]
pub enum Payload {
    Text {
        content: String,
        filename: Option<String>,
    },
    Archive {
        encoded: String,
    },
}

impl Payload {
    /// Extracts the payload from a request body.
    pub fn from_body(body: LintRequestBody) -> Result<(Self, LintOptions)> {
        let options = body.options.unwrap_or_default();
        let payload = match (body.content, body.archive) {
            (Some(content), _) => Self::Text {
                content,
                filename: body.filename,
            },
            (None, Some(encoded)) => Self::Archive { encoded },
            (None, None) => {
                return Err(ApiError::Validation(
                    "request requires either 'content' or 'archive'".to_string(),
                ))
            }
        };
        Ok((payload, options))
    }

    /// The raw submitted bytes used for content addressing: the text
    /// itself, or the decoded archive bytes.
    pub fn content_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Text { content, .. } => Ok(content.clone().into_bytes()),
            Self::Archive { encoded } => STANDARD
                .decode(encoded.trim())
                .map_err(|e| WorkspaceError::InvalidBase64(e.to_string()).into()),
        }
    }
}

/// A pipeline outcome, with the cache marker the transport surfaces.
#[derive(Debug, Clone)]
pub struct LintOutcome {
    pub result: ExecutionResult,
    pub cache_hit: bool,
}

/// The lint execution pipeline shared by synchronous requests and job
/// workers.
pub struct LintPipeline {
    workspaces: Arc<WorkspaceManager>,
    runner: Arc<LinterRunner>,
    cache: Arc<CacheService>,
}

impl LintPipeline {
    #[must_use]
    pub fn new(
        workspaces: Arc<WorkspaceManager>,
        runner: Arc<LinterRunner>,
        cache: Arc<CacheService>,
    ) -> Self {
        Self {
            workspaces,
            runner,
            cache,
        }
    }

    #[must_use]
    pub fn runner(&self) -> &Arc<LinterRunner> {
        &self.runner
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    #[must_use]
    pub fn workspaces(&self) -> &Arc<WorkspaceManager> {
        &self.workspaces
    }

    /// Validates the route parameters against the registry.
    pub fn validate_request(
        linter: &str,
        format: &str,
    ) -> Result<(&'static LinterDescriptor, OutputFormat)> {
        let descriptor = LinterRegistry::get(linter)
            .ok_or_else(|| ApiError::InvalidParameters(format!("unknown linter: {linter}")))?;

        let parsed: OutputFormat = format.parse().map_err(|_| ApiError::UnsupportedFormat {
            linter: linter.to_string(),
            format: format.to_string(),
        })?;
        if !descriptor.supports_format(parsed) {
            return Err(ApiError::UnsupportedFormat {
                linter: linter.to_string(),
                format: format.to_string(),
            });
        }
        Ok((descriptor, parsed))
    }

    /// Runs the full pipeline for one request.
    ///
    /// `process_id` lets the job manager pre-register a cancellation
    /// target; synchronous requests pass `None`.
    pub async fn execute(
        &self,
        linter: &str,
        format: OutputFormat,
        payload: &Payload,
        options: &LintOptions,
        process_id: Option<ProcessId>,
    ) -> Result<LintOutcome> {
        let content_bytes = payload.content_bytes()?;
        let content_hash = CacheService::generate_content_hash(&content_bytes);
        let options_hash = CacheService::generate_options_hash(options);

        // Cache lookup
        let cached = {
            let cache = Arc::clone(&self.cache);
            let (ch, l, oh) = (content_hash.clone(), linter.to_string(), options_hash.clone());
            tokio::task::spawn_blocking(move || cache.get(&ch, &l, &oh))
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?
        };
        if let Some(entry) = cached {
            return self.replay_cached(
                linter,
                &entry.result,
                entry.status,
                entry.error_message,
                options.timeout,
            );
        }

        // Miss: provision, run, store, clean up
        let workspace = {
            let workspaces = Arc::clone(&self.workspaces);
            let payload = payload.clone();
            tokio::task::spawn_blocking(move || match payload {
                Payload::Text { content, filename } => {
                    workspaces.create_from_text(&content, filename.as_deref())
                }
                Payload::Archive { encoded } => workspaces.create_from_base64(&encoded),
            })
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))??
        };

        let request = ExecutionRequest {
            linter: linter.to_string(),
            workspace_path: workspace.path.clone(),
            options: options.clone(),
            timeout_ms: options.timeout,
            process_id,
        };

        let run = self.runner.run(&request).await;
        let recorded = self
            .record_outcome(&run, linter, format, &content_hash, &options_hash)
            .await;

        // Cleanup runs on every exit path; failures are logged, not raised
        {
            let workspaces = Arc::clone(&self.workspaces);
            let path = workspace.path.clone();
            let cleaned = tokio::task::spawn_blocking(move || workspaces.cleanup(&path)).await;
            if let Ok(Err(e)) = cleaned {
                tracing::warn!(workspace = %workspace.path.display(), error = %e, "workspace cleanup failed");
            }
        }

        recorded?;
        run.map(|result| LintOutcome {
            result,
            cache_hit: false,
        })
    }

    /// Turns a cached entry back into the response (or error) the
    /// original run produced.
    fn replay_cached(
        &self,
        linter: &str,
        result: &str,
        status: CacheStatus,
        error_message: Option<String>,
        timeout_ms: u64,
    ) -> Result<LintOutcome> {
        match status {
            CacheStatus::Success => {
                let result: ExecutionResult = serde_json::from_str(result)?;
                Ok(LintOutcome {
                    result,
                    cache_hit: true,
                })
            }
            CacheStatus::Timeout => Err(LinterError::Timeout {
                linter: linter.to_string(),
                timeout_ms,
            }
            .into()),
            CacheStatus::Error => Err(LinterError::ExecutionFailed {
                linter: linter.to_string(),
                exit_code: -1,
                stderr: error_message.unwrap_or_else(|| "cached failure".to_string()),
            }
            .into()),
        }
    }

    /// Writes the run outcome to the cache. Success-result write
    /// failures surface; error-outcome writes are best effort so a
    /// broken cache cannot mask the original failure.
    async fn record_outcome(
        &self,
        run: &Result<ExecutionResult>,
        linter: &str,
        format: OutputFormat,
        content_hash: &str,
        options_hash: &str,
    ) -> Result<()> {
        let (result_json, status, error_message) = match run {
            Ok(result) => (
                serde_json::to_string(result)?,
                CacheStatus::Success,
                None,
            ),
            Err(ApiError::Linter(LinterError::Timeout { .. })) => (
                "null".to_string(),
                CacheStatus::Timeout,
                run.as_ref().err().map(ToString::to_string),
            ),
            Err(ApiError::Linter(LinterError::ExecutionFailed { .. })) => (
                "null".to_string(),
                CacheStatus::Error,
                run.as_ref().err().map(ToString::to_string),
            ),
            // Workspace faults, cancellations, and the rest are not cacheable
            Err(_) => return Ok(()),
        };

        let cache = Arc::clone(&self.cache);
        let (ch, l, f, oh) = (
            content_hash.to_string(),
            linter.to_string(),
            format.as_str().to_string(),
            options_hash.to_string(),
        );
        let stored = tokio::task::spawn_blocking(move || {
            cache.set(&ch, &l, &f, &oh, result_json, status, error_message, None)
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

        match (status, stored) {
            (CacheStatus::Success, Err(e)) => Err(e.into()),
            (_, Err(e)) => {
                tracing::warn!(error = %e, "failed to cache error outcome");
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Compressed GET payloads
// ============================================================================

/// Decodes a URL-path payload: base64 (URL-safe, with standard as a
/// fallback) wrapping raw-deflate-compressed text.
pub fn decode_compressed_payload(encoded: &str, max_bytes: u64) -> Result<String> {
    let bytes = URL_SAFE
        .decode(encoded)
        .or_else(|_| STANDARD.decode(encoded))
        .map_err(|e| ApiError::Validation(format!("invalid base64 payload: {e}")))?;

    let decoder = flate2::read::DeflateDecoder::new(&bytes[..]);
    let mut text = String::new();
    let read = decoder
        .take(max_bytes + 1)
        .read_to_string(&mut text)
        .map_err(|e| ApiError::Validation(format!("invalid deflate payload: {e}")))?;

    if read as u64 > max_bytes {
        return Err(WorkspaceError::ContentTooLarge {
            size: read as u64,
            limit: max_bytes,
        }
        .into());
    }
    Ok(text)
}

// ============================================================================
// Response rendering
// ============================================================================

/// Renders an outcome in the requested output format.
#[must_use]
pub fn render_response(
    linter: &str,
    format: OutputFormat,
    outcome: &LintOutcome,
) -> Value {
    let result = &outcome.result;
    match format {
        OutputFormat::Json => json!({
            "success": result.success,
            "exit_code": result.exit_code,
            "execution_time_ms": result.execution_time_ms,
            "file_count": result.file_count,
            "issues": result.issues,
            "parsed_output": result.parsed_output,
            "cache_hit": outcome.cache_hit,
        }),
        OutputFormat::Text => json!({
            "success": result.success,
            "output": result.stdout,
            "errors": result.stderr,
            "exit_code": result.exit_code,
            "execution_time_ms": result.execution_time_ms,
            "cache_hit": outcome.cache_hit,
        }),
        OutputFormat::Sarif => sarif_report(linter, outcome),
    }
}

/// Minimal SARIF 2.1.0 envelope around the normalized issues.
fn sarif_report(linter: &str, outcome: &LintOutcome) -> Value {
    let results: Vec<Value> = outcome
        .result
        .issues
        .iter()
        .map(|issue| {
            json!({
                "ruleId": issue.rule,
                "level": match issue.severity {
                    crate::types::Severity::Error => "error",
                    crate::types::Severity::Warning => "warning",
                    crate::types::Severity::Info => "note",
                },
                "message": { "text": issue.message },
                "locations": [{
                    "physicalLocation": {
                        "artifactLocation": { "uri": issue.file },
                        "region": { "startLine": issue.line, "startColumn": issue.column },
                    }
                }],
            })
        })
        .collect();

    json!({
        "version": "2.1.0",
        "$schema": "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/master/Schemata/sarif-schema-2.1.0.json",
        "runs": [{
            "tool": { "driver": { "name": linter } },
            "results": results,
        }],
        "cache_hit": outcome.cache_hit,
    })
}

// ============================================================================
// Tests
// ============================================================================
