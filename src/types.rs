//! Core domain types for lintbox.
//!
//! Newtypes give compile-time safety for identifiers; the remaining
//! types are the wire and storage shapes shared by the services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Identifier for a spawned linter child process.
///
/// Allocated by the runner, one per spawn. The newtype prevents
/// accidental mixing with OS pids, which are recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u64);

impl ProcessId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.0;
        write!(f, "proc:{id}")
    }
}

/// Identifier for an asynchronous lint job.
///
/// Format: `job_{unix_millis}_{random}`. The random suffix keeps ids
/// unique when several submissions land in the same millisecond.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generates a fresh job id.
    #[must_use]
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis();
        let suffix: u64 = rand::random::<u64>() & 0xffff_ffff_ffff;
        Self(format!("job_{millis}_{suffix:012x}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Output formats a linter run can be rendered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Text,
    Sarif,
}

impl OutputFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
            Self::Sarif => "sarif",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            "sarif" => Ok(Self::Sarif),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a normalized lint finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    /// Maps a tool-specific severity label onto the normalized scale.
    ///
    /// Unknown labels default to `Info` rather than failing: parsers
    /// must never reject otherwise-usable output.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        let label = label.to_ascii_lowercase();
        if label.starts_with("err") || label == "fatal" || label == "high" || label == "2" {
            Self::Error
        } else if label.starts_with("warn") || label == "medium" || label == "1" {
            Self::Warning
        } else {
            Self::Info
        }
    }
}

/// One normalized finding produced by a linter run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LintIssue {
    pub file: String,
    pub line: u32,
    pub column: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Log level requested for the underlying tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// Default per-request timeout filled into normalized options (ms).
pub const DEFAULT_OPTIONS_TIMEOUT_MS: u64 = 30_000;

/// Client-supplied lint options.
///
/// Two option objects that differ only in key order or array order
/// normalize to the same value and therefore the same options hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LintOptions {
    pub validate_all: bool,
    pub exclude_patterns: Vec<String>,
    pub include_patterns: Vec<String>,
    pub log_level: LogLevel,
    /// Requested timeout in milliseconds; clamped to the descriptor maximum.
    pub timeout: u64,
    pub fix: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
    pub rules: BTreeMap<String, serde_json::Value>,
}

impl Default for LintOptions {
    fn default() -> Self {
        Self {
            validate_all: false,
            exclude_patterns: Vec::new(),
            include_patterns: Vec::new(),
            log_level: LogLevel::default(),
            timeout: DEFAULT_OPTIONS_TIMEOUT_MS,
            fix: false,
            config_file: None,
            rules: BTreeMap::new(),
        }
    }
}

impl LintOptions {
    /// Returns a copy with array-valued fields sorted.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut out = self.clone();
        out.exclude_patterns.sort();
        out.include_patterns.sort();
        out
    }

    /// Canonical JSON value: defaults filled, arrays sorted, keys in
    /// lexicographic order (serde_json maps are BTree-backed).
    #[must_use]
    pub fn canonical(&self) -> serde_json::Value {
        let n = self.normalized();
        serde_json::json!({
            "config_file": n.config_file.unwrap_or_default(),
            "exclude_patterns": n.exclude_patterns,
            "fix": n.fix,
            "include_patterns": n.include_patterns,
            "log_level": n.log_level.as_str(),
            "rules": n.rules,
            "timeout": n.timeout,
            "validate_all": n.validate_all,
        })
    }
}

/// A single linter execution against a provisioned workspace.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub linter: String,
    pub workspace_path: PathBuf,
    pub options: LintOptions,
    /// Requested timeout; the runner clamps it to the descriptor maximum.
    pub timeout_ms: u64,
    /// Pre-allocated process id, used by the job manager so a running
    /// job can be cancelled through the runner. `None` lets the runner
    /// allocate one itself.
    pub process_id: Option<ProcessId>,
}

/// Normalized outcome of a linter execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// True when the tool ran to completion, regardless of findings.
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
    pub parsed_output: serde_json::Value,
    pub file_count: usize,
    pub issues: Vec<LintIssue>,
    /// Set when stdout or stderr exceeded the capture cap.
    #[serde(default)]
    pub output_truncated: bool,
}

/// Outcome recorded with a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Success,
    Error,
    Timeout,
}

impl CacheStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

impl FromStr for CacheStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "timeout" => Ok(Self::Timeout),
            other => Err(format!("unknown cache status: {other}")),
        }
    }
}

/// A persisted lint result keyed by content, linter, and options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: i64,
    pub content_hash: String,
    pub linter_type: String,
    pub options_hash: String,
    /// Serialized [`ExecutionResult`], or an error description for
    /// non-success entries.
    pub result: String,
    pub format: String,
    pub status: CacheStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Lifecycle state of an asynchronous job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states are final: no further transitions are applied.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A durable record of an asynchronous lint request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub linter_type: String,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Canonical-JSON serialization of the submitted options.
    pub options: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// One request served, recorded for the audit trail. Append-only.
#[derive(Debug, Clone)]
pub struct MetricRecord {
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub cache_hit: bool,
    pub linter_type: Option<String>,
    pub format: Option<String>,
    pub error_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Availability probe outcome for one registered linter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinterAvailability {
    pub name: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

// Compile-time assertions for thread safety.
// These ensure Send+Sync remain implemented and catch regressions.
#[cfg(test)]
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}

    assert_send_sync::<ProcessId>();
    assert_send_sync::<JobId>();
    assert_send_sync::<LintOptions>();
    assert_send_sync::<ExecutionResult>();
    assert_send_sync::<JobRecord>();
};
