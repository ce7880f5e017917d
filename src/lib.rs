//! lintbox: HTTP API for running code linters against isolated workspaces.
//!
//! Clients submit a code fragment or a compressed project archive plus
//! a linter and output-format identifier; the service provisions an
//! isolated workspace, supervises the external linter binary, parses
//! its output into a normalized issue report, caches the result keyed
//! by content and options, and answers synchronously or through an
//! asynchronous job handle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              HTTP Server (axum)             │
//! │   POST /{linter}/{format}   GET /jobs/{id}  │
//! └─────────────────┬───────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────┐
//! │               Orchestrator                  │
//! │  validate, hash, cache, run, store, clean   │
//! └───────┬──────────────┬──────────────┬───────┘
//!         │              │              │
//!   ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!   │ Workspace │  │  Linter   │  │   Job     │
//!   │  Manager  │  │  Runner   │  │  Manager  │
//!   └─────┬─────┘  └─────┬─────┘  └─────┬─────┘
//!         │              │              │
//!   ┌─────▼──────────────▼──────────────▼─────┐
//!   │          SQLite Database                │
//!   │  lint_results / lint_jobs / api_metrics │
//!   └─────────────────────────────────────────┘
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod security;
pub mod server;
pub mod services;
pub mod types;

pub use error::{ApiError, Result};
pub use types::{JobId, ProcessId};

use std::path::PathBuf;

/// Computes the default database path.
///
/// The path is `<data_dir>/lintbox/lintbox.db`, decoupling persistent
/// state from the workspace base so workspace cleanup can never touch
/// the database.
#[must_use]
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("lintbox")
        .join("lintbox.db")
}
