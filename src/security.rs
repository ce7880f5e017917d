//! Path-safety policy for untrusted workspace content.
//!
//! Provides protection against:
//! - Path traversal in archive entries (escaping the workspace)
//! - Dependency/VCS directories smuggled into uploads
//! - File types no registered linter will ever read
//!
//! Archive extraction consults [`admit_entry`] for every entry and
//! silently drops rejects; the text path surfaces the same checks as
//! validation errors on the submitted filename.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Entry admission failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("Absolute path not allowed: '{path}'")]
    AbsolutePath { path: String },

    #[error("Path traversal blocked: '{path}' escapes the workspace")]
    PathTraversal { path: String },

    #[error("Blocked path segment '{segment}' in '{path}'")]
    BlockedSegment { path: String, segment: String },

    #[error("File extension not allowed: '{path}'")]
    DisallowedExtension { path: String },
}

impl SecurityError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AbsolutePath { .. } => "ABSOLUTE_PATH",
            Self::PathTraversal { .. } => "PATH_TRAVERSAL",
            Self::BlockedSegment { .. } => "BLOCKED_SEGMENT",
            Self::DisallowedExtension { .. } => "DISALLOWED_EXTENSION",
        }
    }
}

// ============================================================================
// Segment blocklist
// ============================================================================

/// Path segments that disqualify an entry outright.
///
/// These are dependency trees, VCS metadata, and build output: never
/// useful lint input, frequently enormous.
pub const BLOCKED_SEGMENTS: &[&str] = &[
    "node_modules",
    ".git",
    ".svn",
    ".hg",
    "dist",
    "build",
    "target",
    "vendor",
    "coverage",
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
    ".idea",
    ".vscode",
];

/// Checks whether any normal component of `path` is blocklisted.
#[must_use]
pub fn has_blocked_segment(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(seg) => seg
            .to_str()
            .is_some_and(|s| BLOCKED_SEGMENTS.contains(&s.to_ascii_lowercase().as_str())),
        _ => false,
    })
}

// ============================================================================
// Extension allowlist
// ============================================================================

/// Extensions any registered linter might accept (lowercase).
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    // JavaScript / TypeScript
    "js", "jsx", "mjs", "cjs", "ts", "tsx", "vue",
    // Python / Ruby / Go
    "py", "pyi", "rb", "rake", "go",
    // Shell
    "sh", "bash", "ksh", "dash",
    // Markup & config
    "json", "yml", "yaml", "toml", "xml", "md", "markdown", "html", "css", "scss",
    // Infra
    "dockerfile", "tf", "hcl",
    // Other languages linters cover
    "java", "kt", "c", "cpp", "h", "hpp", "cs", "php", "pl", "lua", "r", "swift", "scala",
    "groovy", "ps1", "sql", "txt",
];

/// Extensionless filenames treated as lintable (lowercase).
pub const ALLOWED_FILENAMES: &[&str] = &["dockerfile", "makefile", "rakefile", "gemfile"];

/// Checks whether the file's extension (or well-known name) is admissible.
#[must_use]
pub fn extension_allowed(path: &Path) -> bool {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        return ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str());
    }
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| ALLOWED_FILENAMES.contains(&n.to_ascii_lowercase().as_str()))
}

// ============================================================================
// Path normalization & admission
// ============================================================================

/// Normalizes a path by resolving `.` and `..` components without
/// filesystem access.
fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if components
                    .last()
                    .is_some_and(|c| !matches!(c, Component::ParentDir))
                {
                    components.pop();
                } else {
                    components.push(component);
                }
            }
            _ => {
                components.push(component);
            }
        }
    }

    components.iter().collect()
}

/// Validates an untrusted relative path for inclusion in a workspace.
///
/// Returns the normalized relative path on success.
///
/// # Example
///
/// ```
/// use lintbox::security::admit_entry;
/// use std::path::Path;
///
/// assert!(admit_entry(Path::new("src/app.js")).is_ok());
/// assert!(admit_entry(Path::new("./lib/../index.ts")).is_ok());
///
/// assert!(admit_entry(Path::new("../../etc/passwd")).is_err());
/// assert!(admit_entry(Path::new("/etc/passwd")).is_err());
/// assert!(admit_entry(Path::new("node_modules/x/index.js")).is_err());
/// assert!(admit_entry(Path::new("payload.exe")).is_err());
/// ```
pub fn admit_entry(entry: &Path) -> Result<PathBuf, SecurityError> {
    let display = entry.display().to_string();

    if entry.is_absolute() {
        return Err(SecurityError::AbsolutePath { path: display });
    }

    let normalized = normalize_path(entry);

    // Any parent component surviving normalization escapes the root
    if normalized
        .components()
        .any(|c| matches!(c, Component::ParentDir))
        || normalized.as_os_str().is_empty()
    {
        return Err(SecurityError::PathTraversal { path: display });
    }

    if let Some(segment) = normalized.components().find_map(|c| match c {
        Component::Normal(seg) => seg
            .to_str()
            .filter(|s| BLOCKED_SEGMENTS.contains(&s.to_ascii_lowercase().as_str()))
            .map(String::from),
        _ => None,
    }) {
        return Err(SecurityError::BlockedSegment {
            path: display,
            segment,
        });
    }

    if !extension_allowed(&normalized) {
        return Err(SecurityError::DisallowedExtension { path: display });
    }

    Ok(normalized)
}

/// Joins an admitted entry path to the workspace root, re-checking that
/// the result stays strictly inside the root.
pub fn safe_join(root: &Path, entry: &Path) -> Result<PathBuf, SecurityError> {
    let normalized = admit_entry(entry)?;
    let joined = root.join(&normalized);
    if !joined.starts_with(root) {
        return Err(SecurityError::PathTraversal {
            path: entry.display().to_string(),
        });
    }
    Ok(joined)
}

// ============================================================================
// Tests
// ============================================================================
