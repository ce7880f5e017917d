//! Workspace provisioning from untrusted input.
//!
//! A workspace is a uniquely-named directory under the configured base,
//! owned by one request (or one job) from creation until cleanup.
//! Everything written into it went through the admission policy in
//! [`crate::security`]; archives are additionally subject to
//! progressive decompression quotas so a small upload cannot expand
//! into an unbounded amount of disk.

use crate::config::ServiceConfig;
use crate::error::{WorkspaceError, WorkspaceResult};
use crate::security;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use std::fmt;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Gzip stream magic bytes.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Default filename for bare text submissions.
const DEFAULT_FILENAME: &str = "code.txt";

/// Supported archive container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
}

/// A provisioned workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Absolute path, a direct child of the configured base directory.
    pub path: PathBuf,
    /// Relative paths of all regular files, sorted.
    pub files: Vec<PathBuf>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of [`WorkspaceManager::validate`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkspaceValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Creates, inspects, and removes workspaces.
pub struct WorkspaceManager {
    base_dir: PathBuf,
    max_file_bytes: u64,
    max_archive_bytes: u64,
    max_files: usize,
    max_age: Duration,
}

impl WorkspaceManager {
    /// Creates a manager rooted at the configured base directory,
    /// creating it if needed.
    pub fn new(config: &ServiceConfig) -> WorkspaceResult<Self> {
        fs::create_dir_all(&config.workspace_base)?;
        let base_dir = dunce::canonicalize(&config.workspace_base)?;
        Ok(Self {
            base_dir,
            max_file_bytes: config.max_file_bytes,
            max_archive_bytes: config.max_archive_bytes,
            max_files: config.max_workspace_files,
            max_age: Duration::from_secs(config.workspace_max_age_secs),
        })
    }

    /// The directory all workspaces live under.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Writes a single file containing `content`.
    ///
    /// Only the final component of a client-supplied filename is used;
    /// directory parts cannot place the file elsewhere.
    pub fn create_from_text(
        &self,
        content: &str,
        filename: Option<&str>,
    ) -> WorkspaceResult<Workspace> {
        if content.len() as u64 > self.max_file_bytes {
            return Err(WorkspaceError::ContentTooLarge {
                size: content.len() as u64,
                limit: self.max_file_bytes,
            });
        }

        let name = filename
            .map(Path::new)
            .and_then(Path::file_name)
            .map_or_else(|| DEFAULT_FILENAME.into(), PathBuf::from);

        let dir = self.provision_dir()?;
        if let Err(e) = fs::write(dir.join(&name), content) {
            self.remove_partial(&dir);
            return Err(e.into());
        }
        self.assemble(dir)
    }

    /// Decodes base64 and dispatches on content: gzip streams unpack as
    /// tar archives, anything else becomes a single text file.
    pub fn create_from_base64(&self, encoded: &str) -> WorkspaceResult<Workspace> {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| WorkspaceError::InvalidBase64(e.to_string()))?;

        if bytes.starts_with(&GZIP_MAGIC) {
            return self.create_from_buffer(&bytes, ArchiveKind::TarGz);
        }

        if bytes.len() as u64 > self.max_file_bytes {
            return Err(WorkspaceError::ContentTooLarge {
                size: bytes.len() as u64,
                limit: self.max_file_bytes,
            });
        }

        let dir = self.provision_dir()?;
        if let Err(e) = fs::write(dir.join(DEFAULT_FILENAME), &bytes) {
            self.remove_partial(&dir);
            return Err(e.into());
        }
        self.assemble(dir)
    }

    /// Extracts an archive buffer into a fresh workspace.
    ///
    /// Every entry passes the admission policy: traversal, blocklisted
    /// segments, disallowed extensions, and non-regular entries are
    /// dropped. Quota breaches abort extraction and the partial
    /// workspace is removed before the error propagates.
    pub fn create_from_buffer(
        &self,
        bytes: &[u8],
        kind: ArchiveKind,
    ) -> WorkspaceResult<Workspace> {
        let ArchiveKind::TarGz = kind;

        let dir = self.provision_dir()?;
        if let Err(e) = self.extract_tar_gz(&dir, bytes) {
            self.remove_partial(&dir);
            return Err(e);
        }
        self.assemble(dir)
    }

    fn extract_tar_gz(&self, dir: &Path, bytes: &[u8]) -> WorkspaceResult<()> {
        let decoder = GzDecoder::new(Cursor::new(bytes));
        let limited = QuotaReader::new(decoder, self.max_archive_bytes);
        let mut archive = tar::Archive::new(limited);

        let mut admitted: usize = 0;
        let entries = archive
            .entries()
            .map_err(|e| self.map_archive_io(e))?;

        for entry in entries {
            let mut entry = entry.map_err(|e| self.map_archive_io(e))?;

            // Only regular files: symlinks, devices, and hardlinks are dropped
            if !entry.header().entry_type().is_file() {
                continue;
            }

            let Ok(raw_path) = entry.path().map(|p| p.into_owned()) else {
                continue;
            };
            let rel = match security::admit_entry(&raw_path) {
                Ok(rel) => rel,
                Err(reason) => {
                    tracing::debug!(entry = %raw_path.display(), %reason, "dropping archive entry");
                    continue;
                }
            };

            admitted += 1;
            if admitted > self.max_files {
                return Err(WorkspaceError::TooManyFiles {
                    limit: self.max_files,
                });
            }

            let mut contents = Vec::new();
            entry
                .read_to_end(&mut contents)
                .map_err(|e| self.map_archive_io(e))?;

            let target = dir.join(&rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, &contents)?;
        }

        Ok(())
    }

    /// Maps extraction IO failures: quota trips become the size error,
    /// anything else is a malformed archive.
    fn map_archive_io(&self, e: io::Error) -> WorkspaceError {
        if e.get_ref().is_some_and(|inner| inner.is::<QuotaExceeded>()) {
            WorkspaceError::ArchiveTooLarge {
                limit: self.max_archive_bytes,
            }
        } else {
            WorkspaceError::Archive(e.to_string())
        }
    }

    /// Checks that a workspace directory exists and holds at least one file.
    #[must_use]
    pub fn validate(&self, path: &Path) -> WorkspaceValidation {
        let mut errors = Vec::new();

        if !path.exists() {
            errors.push(format!("workspace does not exist: {}", path.display()));
        } else if !path.is_dir() {
            errors.push(format!("workspace is not a directory: {}", path.display()));
        } else {
            match self.list_files(path) {
                Ok(files) if files.is_empty() => {
                    errors.push("workspace contains no files".to_string());
                }
                Ok(_) => {}
                Err(e) => errors.push(format!("workspace unreadable: {e}")),
            }
        }

        WorkspaceValidation {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Returns sorted relative paths of all regular files under `path`.
    pub fn list_files(&self, path: &Path) -> WorkspaceResult<Vec<PathBuf>> {
        fn walk(dir: &Path, base: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let file_type = entry.file_type()?;
                let path = entry.path();
                if file_type.is_dir() {
                    walk(&path, base, out)?;
                } else if file_type.is_file() {
                    if let Ok(rel) = path.strip_prefix(base) {
                        out.push(rel.to_path_buf());
                    }
                }
            }
            Ok(())
        }

        if !path.is_dir() {
            return Err(WorkspaceError::NotFound {
                path: path.display().to_string(),
            });
        }

        let mut files = Vec::new();
        walk(path, path, &mut files)?;
        files.sort();
        Ok(files)
    }

    /// Removes a workspace. Idempotent: a missing path is not an error.
    pub fn cleanup(&self, path: &Path) -> WorkspaceResult<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes workspaces older than the configured maximum age.
    /// Returns how many were removed.
    pub fn cleanup_expired(&self) -> WorkspaceResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let expired = entry
                .metadata()
                .and_then(|m| m.modified())
                .and_then(|t| t.elapsed().map_err(|e| io::Error::other(e.to_string())))
                .is_ok_and(|age| age > self.max_age);
            if expired {
                match fs::remove_dir_all(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        tracing::warn!(workspace = %path.display(), error = %e, "expired workspace removal failed");
                    }
                }
            }
        }
        Ok(removed)
    }

    /// Creates a uniquely-named workspace directory.
    ///
    /// Names come from strong random bytes, so concurrent creations
    /// never collide.
    fn provision_dir(&self) -> WorkspaceResult<PathBuf> {
        let dir = self
            .base_dir
            .join(format!("ws_{}", Uuid::new_v4().simple()));
        fs::create_dir(&dir)?;
        Ok(dir)
    }

    fn remove_partial(&self, dir: &Path) {
        if let Err(e) = fs::remove_dir_all(dir) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(workspace = %dir.display(), error = %e, "partial workspace removal failed");
            }
        }
    }

    fn assemble(&self, dir: PathBuf) -> WorkspaceResult<Workspace> {
        let files = self.list_files(&dir)?;
        let mut size_bytes = 0;
        for rel in &files {
            size_bytes += fs::metadata(dir.join(rel)).map(|m| m.len()).unwrap_or(0);
        }
        Ok(Workspace {
            path: dir,
            files,
            size_bytes,
            created_at: Utc::now(),
        })
    }
}

// ============================================================================
// Progressive decompression quota
// ============================================================================

/// Marker error raised when the decompressed stream outgrows its quota.
#[derive(Debug)]
struct QuotaExceeded;

impl fmt::Display for QuotaExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("decompressed size quota exceeded")
    }
}

impl std::error::Error for QuotaExceeded {}

/// Counts bytes as they stream out of the decompressor and fails the
/// read that crosses the limit, aborting extraction mid-stream.
struct QuotaReader<R> {
    inner: R,
    remaining: u64,
}

impl<R> QuotaReader<R> {
    fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }
}

impl<R: Read> Read for QuotaReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n as u64 > self.remaining {
            return Err(io::Error::other(QuotaExceeded));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

// ============================================================================
// Tests
// ============================================================================
