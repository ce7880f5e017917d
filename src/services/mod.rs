//! Core services of the linting pipeline.

mod cache;
mod jobs;
mod orchestrator;
mod parsers;
mod registry;
mod runner;
mod workspace;

pub use cache::{CacheService, CacheStats, CacheStore, CleanupTask, HitMissStats, WarmCacheConfig};
pub use jobs::{JobManager, JobStats};
pub use orchestrator::{
    decode_compressed_payload, render_response, LintOutcome, LintPipeline, LintRequestBody,
    Payload,
};
pub use parsers::{parse_output, ParsedOutput, ParserId};
pub use registry::{LinterDescriptor, LinterRegistry, LINTERS};
pub use runner::LinterRunner;
pub use workspace::{ArchiveKind, Workspace, WorkspaceManager, WorkspaceValidation};
