//! External linter execution.
//!
//! Spawns the tool with an argv vector (never a shell), supervises
//! stdout/stderr with bounded buffering, and resolves each run through
//! a three-way select: child exit, timeout, or external cancel. Every
//! live child is tracked in a shared map so `cancel` and
//! `running_processes` can observe it; the map lock is only ever held
//! for O(1) insert/remove, never across a wait.

use crate::error::{ApiError, LinterError, Result, WorkspaceError};
use crate::services::parsers::parse_output;
use crate::services::registry::{LinterDescriptor, LinterRegistry};
use crate::types::{ExecutionRequest, ExecutionResult, LintOptions, LinterAvailability, ProcessId};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Notify};

/// Grace period between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_millis(500);

/// Timeout for `--version` availability probes.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

struct ProcHandle {
    cancel: Arc<Notify>,
    done: watch::Receiver<bool>,
}

/// Runs registered linters against workspaces.
pub struct LinterRunner {
    processes: Mutex<HashMap<ProcessId, ProcHandle>>,
    next_id: AtomicU64,
    output_cap: usize,
}

impl LinterRunner {
    #[must_use]
    pub fn new(output_cap: usize) -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            output_cap,
        }
    }

    /// Reserves a process id ahead of the spawn, so callers (the job
    /// manager) can target a cancel at a run they are about to start.
    pub fn allocate_process_id(&self) -> ProcessId {
        ProcessId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Executes a registered linter against a provisioned workspace.
    ///
    /// Preconditions checked here: the linter is registered, the
    /// workspace directory exists, and at least one file in it matches
    /// the linter's supported set. A provisioned workspace with no
    /// admissible files (an archive whose every entry was dropped)
    /// fails the same way as one with no matching files.
    pub async fn run(&self, req: &ExecutionRequest) -> Result<ExecutionResult> {
        let descriptor = LinterRegistry::get(&req.linter)
            .ok_or_else(|| LinterError::Unregistered(req.linter.clone()))?;
        self.run_with(descriptor, req).await
    }

    /// Executes against an explicit descriptor.
    ///
    /// Exposed so deployments can drive unregistered tools through the
    /// same supervision path; `run` is the registry-validated entry.
    pub async fn run_with(
        &self,
        descriptor: &LinterDescriptor,
        req: &ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let files = workspace_files(&req.workspace_path)?;
        let supported = files
            .iter()
            .filter(|f| descriptor.supports_file(f))
            .count();
        if supported == 0 {
            return Err(LinterError::NoSupportedFiles(req.linter.clone()).into());
        }

        let args = build_args(descriptor, &req.options, &req.workspace_path);
        let timeout_ms = clamp_timeout(req.timeout_ms, descriptor.timeout_ms);

        let mut command = Command::new(descriptor.executable);
        command
            .args(&args)
            .current_dir(&req.workspace_path)
            .env("RUN_LOCAL", "true")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if req.options.validate_all {
            command.env("VALIDATE_ALL_CODEBASE", "true");
        }

        // Register before spawning: a job manager holding a
        // pre-allocated id may cancel at any point from here on.
        let process_id = req
            .process_id
            .unwrap_or_else(|| self.allocate_process_id());
        let cancel = Arc::new(Notify::new());
        let (done_tx, done_rx) = watch::channel(false);
        {
            let mut processes = self.processes.lock().unwrap_or_else(|e| e.into_inner());
            processes.insert(
                process_id,
                ProcHandle {
                    cancel: Arc::clone(&cancel),
                    done: done_rx,
                },
            );
        }
        // Deregisters on every exit path below
        let _guard = ProcessGuard {
            runner: self,
            id: process_id,
            done: done_tx,
        };

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LinterError::ExecutableNotFound(req.linter.clone())
            } else {
                LinterError::Spawn {
                    linter: req.linter.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let cap = self.output_cap;
        let stdout_task = child
            .stdout
            .take()
            .map(|s| tokio::spawn(read_capped(s, cap)));
        let stderr_task = child
            .stderr
            .take()
            .map(|s| tokio::spawn(read_capped(s, cap)));

        tracing::debug!(linter = %req.linter, %process_id, ?args, "spawned linter");

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| LinterError::Spawn {
                linter: req.linter.clone(),
                reason: e.to_string(),
            })?,
            () = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                terminate(&mut child).await;
                tracing::warn!(linter = %req.linter, %process_id, timeout_ms, "linter timed out");
                return Err(LinterError::Timeout {
                    linter: req.linter.clone(),
                    timeout_ms,
                }
                .into());
            }
            () = cancel.notified() => {
                terminate(&mut child).await;
                tracing::info!(linter = %req.linter, %process_id, "linter cancelled");
                return Err(LinterError::Cancelled(req.linter.clone()).into());
            }
        };

        let (stdout, stdout_truncated) = join_reader(stdout_task).await;
        let (stderr, stderr_truncated) = join_reader(stderr_task).await;
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let exit_code = exit_code_of(&status);
        if !descriptor.exit_code_is_success(exit_code) {
            return Err(LinterError::ExecutionFailed {
                linter: req.linter.clone(),
                exit_code,
                stderr: snippet(&stderr),
            }
            .into());
        }

        let parsed = parse_output(descriptor.parser, &stdout, &stderr, exit_code);
        Ok(ExecutionResult {
            success: true,
            exit_code,
            stdout,
            stderr,
            execution_time_ms,
            parsed_output: parsed.parsed,
            file_count: supported,
            issues: parsed.issues,
            output_truncated: stdout_truncated || stderr_truncated,
        })
    }

    /// Terminates a tracked child and waits for it to exit.
    ///
    /// Returns false when the id is not currently tracked.
    pub async fn cancel(&self, process_id: ProcessId) -> bool {
        let handle = {
            let processes = self.processes.lock().unwrap_or_else(|e| e.into_inner());
            processes.get(&process_id).map(|h| ProcHandle {
                cancel: Arc::clone(&h.cancel),
                done: h.done.clone(),
            })
        };
        let Some(mut handle) = handle else {
            return false;
        };

        handle.cancel.notify_one();
        // Resolves once the run removes itself from the live set
        while !*handle.done.borrow() {
            if handle.done.changed().await.is_err() {
                break;
            }
        }
        true
    }

    /// Snapshot of live process identifiers.
    #[must_use]
    pub fn running_processes(&self) -> Vec<ProcessId> {
        let processes = self.processes.lock().unwrap_or_else(|e| e.into_inner());
        processes.keys().copied().collect()
    }

    /// Probes every registered executable and reports availability.
    pub async fn get_all_linter_status(&self) -> Vec<LinterAvailability> {
        let mut set = tokio::task::JoinSet::new();
        for descriptor in LinterRegistry::all() {
            set.spawn(probe_linter(descriptor));
        }

        let mut statuses: Vec<LinterAvailability> = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            if let Ok(status) = joined {
                statuses.push(status);
            }
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}

struct ProcessGuard<'a> {
    runner: &'a LinterRunner,
    id: ProcessId,
    done: watch::Sender<bool>,
}

impl Drop for ProcessGuard<'_> {
    fn drop(&mut self) {
        let mut processes = self
            .runner
            .processes
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        processes.remove(&self.id);
        let _ = self.done.send(true);
    }
}

/// Builds the argument vector: base args, then `--fix` and
/// `--config <path>` where the descriptor allows them, then the
/// workspace path as the final positional argument.
fn build_args(
    descriptor: &LinterDescriptor,
    options: &LintOptions,
    workspace_path: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = descriptor.base_args.iter().map(ToString::to_string).collect();

    if options.fix && descriptor.accepts_fix {
        args.push("--fix".to_string());
    }
    if let Some(config) = options.config_file.as_deref() {
        if !config.is_empty() && descriptor.accepts_config_file {
            args.push("--config".to_string());
            args.push(config.to_string());
        }
    }

    args.push(workspace_path.display().to_string());
    args
}

/// Request timeouts are clamped to the descriptor maximum; zero means
/// "descriptor default".
fn clamp_timeout(requested_ms: u64, descriptor_ms: u64) -> u64 {
    if requested_ms == 0 {
        descriptor_ms
    } else {
        requested_ms.min(descriptor_ms)
    }
}

/// Exit code, with signal terminations reported as the negated signal.
fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .or_else(|| status.signal().map(|s| -s))
            .unwrap_or(-1)
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(-1)
    }
}

/// SIGTERM, a short grace period, then SIGKILL.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // Safety: signalling a pid we own
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }

    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Buffers a child stream up to `cap` bytes; past the cap the stream is
/// still drained (so the child never blocks on a full pipe) but the
/// output is marked truncated.
async fn read_capped<R: AsyncRead + Unpin>(mut stream: R, cap: usize) -> (String, bool) {
    let mut buf: Vec<u8> = Vec::with_capacity(8192);
    let mut scratch = [0u8; 8192];
    let mut truncated = false;

    loop {
        match stream.read(&mut scratch).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < cap {
                    let take = n.min(cap - buf.len());
                    buf.extend_from_slice(&scratch[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }

    (String::from_utf8_lossy(&buf).into_owned(), truncated)
}

async fn join_reader(task: Option<tokio::task::JoinHandle<(String, bool)>>) -> (String, bool) {
    match task {
        Some(task) => task.await.unwrap_or_else(|_| (String::new(), false)),
        None => (String::new(), false),
    }
}

fn snippet(s: &str) -> String {
    const MAX: usize = 2000;
    if s.len() <= MAX {
        return s.trim().to_string();
    }
    let mut end = MAX;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].trim().to_string()
}

async fn probe_linter(descriptor: &'static LinterDescriptor) -> LinterAvailability {
    let spawned = Command::new(descriptor.executable)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(PROBE_TIMEOUT, spawned).await;
    match output {
        Ok(Ok(out)) if out.status.success() => {
            let version = String::from_utf8_lossy(&out.stdout)
                .lines()
                .next()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty());
            LinterAvailability {
                name: descriptor.name.to_string(),
                available: true,
                version,
            }
        }
        _ => LinterAvailability {
            name: descriptor.name.to_string(),
            available: false,
            version: None,
        },
    }
}

fn workspace_files(path: &Path) -> Result<Vec<std::path::PathBuf>> {
    fn walk(dir: &Path, base: &Path, out: &mut Vec<std::path::PathBuf>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
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
        return Err(ApiError::Workspace(WorkspaceError::NotFound {
            path: path.display().to_string(),
        }));
    }
    let mut files = Vec::new();
    walk(path, path, &mut files).map_err(WorkspaceError::from)?;
    files.sort();
    Ok(files)
}

// ============================================================================
// Tests
// ============================================================================
