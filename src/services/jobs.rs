//! Bounded-concurrency job manager.
//!
//! Jobs are authoritative in the persistent store; the in-process
//! queue is a cache of pending work that is reconciled from the store
//! on startup. Submission never blocks on worker capacity: records are
//! persisted as `pending` and drained FIFO by a dispatcher that holds
//! a semaphore sized to `max_concurrent_jobs`.

use crate::db::{Database, JobCounts};
use crate::error::{ApiError, JobError, LinterError, Result};
use crate::services::orchestrator::{render_response, LintPipeline, Payload};
use crate::types::{
    JobId, JobRecord, JobStatus, LintOptions, OutputFormat, ProcessId,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// Aggregated job statistics for the metrics surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStats {
    #[serde(flatten)]
    pub counts: JobCounts,
    /// Jobs waiting for a worker; equals the pending count.
    pub queue_length: u64,
    pub max_concurrent: usize,
}

/// Schedules asynchronous lint jobs over the shared pipeline.
pub struct JobManager {
    db: Arc<Database>,
    pipeline: Arc<LintPipeline>,
    queue: mpsc::UnboundedSender<JobId>,
    /// job id -> runner process id, for cancelling running jobs.
    running: Mutex<HashMap<String, ProcessId>>,
    max_concurrent: usize,
    job_timeout_ms: u64,
}

impl JobManager {
    /// Builds the manager, fails orphaned jobs from a previous process,
    /// re-enqueues persisted pending work, and starts the dispatcher.
    pub async fn new(
        db: Arc<Database>,
        pipeline: Arc<LintPipeline>,
        max_concurrent: usize,
        job_timeout_ms: u64,
    ) -> Result<Arc<Self>> {
        // Reconcile from the store: anything still marked running is an
        // orphan from a crashed or restarted process.
        let recovered = {
            let db = Arc::clone(&db);
            tokio::task::spawn_blocking(move || {
                let now = Utc::now();
                let cutoff = now - chrono::Duration::milliseconds(job_timeout_ms as i64);
                let orphaned = db.fail_orphaned_jobs(cutoff, now)?;
                let pending = db.pending_jobs()?;
                Ok::<_, crate::error::DbError>((orphaned, pending))
            })
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
        };
        let (orphaned, pending) = recovered?;
        if orphaned > 0 {
            tracing::warn!(orphaned, "failed orphaned jobs from previous run");
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<JobId>();
        let manager = Arc::new(Self {
            db,
            pipeline,
            queue: tx,
            running: Mutex::new(HashMap::new()),
            max_concurrent,
            job_timeout_ms,
        });

        // Persisted pending jobs go first, in created_at order; new
        // submissions land behind them on the same channel.
        for job in &pending {
            let _ = manager.queue.send(job.job_id.clone());
        }
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "re-enqueued persisted pending jobs");
        }

        let dispatcher = Arc::clone(&manager);
        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(dispatcher.max_concurrent));
            while let Some(job_id) = rx.recv().await {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let manager = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    manager.run_job(&job_id).await;
                    drop(permit);
                });
            }
        });

        Ok(manager)
    }

    /// Persists a new pending job and returns its id immediately.
    pub async fn submit_job(
        &self,
        linter: &str,
        format: OutputFormat,
        payload: &Payload,
        options: &LintOptions,
    ) -> Result<JobId> {
        let job_id = JobId::generate();
        let (content, archive, filename) = match payload {
            Payload::Text { content, filename } => {
                (Some(content.clone()), None, filename.clone())
            }
            Payload::Archive { encoded } => (None, Some(encoded.clone()), None),
        };

        let record = JobRecord {
            job_id: job_id.clone(),
            linter_type: linter.to_string(),
            format: format.as_str().to_string(),
            content,
            archive,
            filename,
            options: options.canonical().to_string(),
            status: JobStatus::Pending,
            result: None,
            error_message: None,
            execution_time_ms: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        {
            let db = Arc::clone(&self.db);
            let record = record.clone();
            tokio::task::spawn_blocking(move || db.insert_job(&record))
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))??;
        }

        if self.queue.send(job_id.clone()).is_err() {
            // Dispatcher gone; the job stays pending and is recovered on restart
            tracing::warn!(%job_id, "job queue closed, job persisted as pending");
        }
        tracing::info!(%job_id, linter, "job submitted");
        Ok(job_id)
    }

    /// Fetches a job record, or `None` for unknown ids.
    pub async fn get_job_status(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let db = Arc::clone(&self.db);
        let id = job_id.to_string();
        tokio::task::spawn_blocking(move || db.get_job(&id))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .map_err(ApiError::from)
    }

    /// Cancels a job.
    ///
    /// Pending jobs transition to `cancelled` without running. Running
    /// jobs have their child signalled; the transition lands after the
    /// child exits. Terminal jobs return false, unchanged.
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool> {
        let Some(job) = self.get_job_status(job_id).await? else {
            return Err(JobError::NotFound(job_id.to_string()).into());
        };
        if job.status.is_terminal() {
            return Ok(false);
        }

        // Pending: flip it before a worker picks it up
        if job.status == JobStatus::Pending {
            let db = Arc::clone(&self.db);
            let id = job_id.to_string();
            let flipped =
                tokio::task::spawn_blocking(move || db.cancel_job_if_pending(&id, Utc::now()))
                    .await
                    .map_err(|e| ApiError::Internal(e.to_string()))??;
            if flipped {
                tracing::info!(job_id, "cancelled pending job");
                return Ok(true);
            }
            // Lost the race with a worker; fall through as running
        }

        let process_id = {
            let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            running.get(job_id).copied()
        };
        if let Some(process_id) = process_id {
            // Returns after the child exits
            self.pipeline.runner().cancel(process_id).await;
        }

        let db = Arc::clone(&self.db);
        let id = job_id.to_string();
        let cancelled = tokio::task::spawn_blocking(move || {
            db.finish_job(&id, JobStatus::Cancelled, None, None, None, Utc::now())
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
        if cancelled {
            tracing::info!(job_id, "cancelled running job");
        }
        Ok(cancelled)
    }

    /// Counts by state, with completed/failed windowed to the last 24h.
    pub async fn get_job_stats(&self) -> Result<JobStats> {
        let db = Arc::clone(&self.db);
        let counts: JobCounts = tokio::task::spawn_blocking(move || {
            db.job_counts(chrono::Duration::hours(24), Utc::now())
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

        Ok(JobStats {
            queue_length: counts.pending,
            counts,
            max_concurrent: self.max_concurrent,
        })
    }

    /// Snapshot of in-flight job records.
    pub async fn get_running_jobs(&self) -> Result<Vec<JobRecord>> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || db.running_jobs())
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .map_err(ApiError::from)
    }

    /// Drives one job through the shared pipeline.
    async fn run_job(&self, job_id: &JobId) {
        let job = match self.get_job_status(job_id.as_str()).await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(%job_id, error = %e, "failed to load job");
                return;
            }
        };
        // Cancelled (or otherwise moved on) while queued
        if job.status != JobStatus::Pending {
            return;
        }

        let started = {
            let db = Arc::clone(&self.db);
            let id = job_id.as_str().to_string();
            tokio::task::spawn_blocking(move || db.mark_job_running(&id, Utc::now())).await
        };
        match started {
            Ok(Ok(true)) => {}
            // Raced with a cancel between load and transition
            Ok(Ok(false)) => return,
            Ok(Err(e)) => {
                tracing::warn!(%job_id, error = %e, "failed to start job");
                return;
            }
            Err(e) => {
                tracing::warn!(%job_id, error = %e, "job start task failed");
                return;
            }
        }

        let payload = match (&job.content, &job.archive) {
            (Some(content), _) => Payload::Text {
                content: content.clone(),
                filename: job.filename.clone(),
            },
            (None, Some(encoded)) => Payload::Archive {
                encoded: encoded.clone(),
            },
            (None, None) => {
                self.finish(job_id, JobStatus::Failed, None, Some("job has no payload"), None)
                    .await;
                return;
            }
        };
        let options: LintOptions = serde_json::from_str(&job.options).unwrap_or_default();
        let format: OutputFormat = job.format.parse().unwrap_or(OutputFormat::Json);

        // Pre-register the cancellation target before the spawn
        let process_id = self.pipeline.runner().allocate_process_id();
        {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            running.insert(job_id.as_str().to_string(), process_id);
        }

        let started_at = std::time::Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_millis(self.job_timeout_ms),
            self.pipeline.execute(
                &job.linter_type,
                format,
                &payload,
                &options,
                Some(process_id),
            ),
        )
        .await;

        {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            running.remove(job_id.as_str());
        }
        let execution_time_ms = started_at.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(outcome)) => {
                let rendered =
                    render_response(&job.linter_type, format, &outcome).to_string();
                self.finish(
                    job_id,
                    JobStatus::Completed,
                    Some(rendered),
                    None,
                    Some(execution_time_ms),
                )
                .await;
            }
            Ok(Err(ApiError::Linter(LinterError::Cancelled(_)))) => {
                // cancel_job owns the terminal transition; this is a
                // no-op if it already landed
                self.finish(job_id, JobStatus::Cancelled, None, None, Some(execution_time_ms))
                    .await;
            }
            Ok(Err(e)) => {
                self.finish(
                    job_id,
                    JobStatus::Failed,
                    None,
                    Some(&e.to_string()),
                    Some(execution_time_ms),
                )
                .await;
            }
            Err(_) => {
                tracing::warn!(%job_id, timeout_ms = self.job_timeout_ms, "job exceeded timeout");
                self.finish(
                    job_id,
                    JobStatus::Failed,
                    None,
                    Some("job exceeded the configured timeout"),
                    Some(execution_time_ms),
                )
                .await;
            }
        }
    }

    async fn finish(
        &self,
        job_id: &JobId,
        status: JobStatus,
        result: Option<String>,
        error_message: Option<&str>,
        execution_time_ms: Option<u64>,
    ) {
        let db = Arc::clone(&self.db);
        let id = job_id.as_str().to_string();
        let error_message = error_message.map(ToString::to_string);
        let finished = tokio::task::spawn_blocking(move || {
            db.finish_job(
                &id,
                status,
                result.as_deref(),
                error_message.as_deref(),
                execution_time_ms,
                Utc::now(),
            )
        })
        .await;

        match finished {
            Ok(Ok(true)) => {
                tracing::info!(%job_id, status = status.as_str(), "job finished");
            }
            Ok(Ok(false)) => {
                // A terminal transition (cancel) beat us; terminal states are final
            }
            Ok(Err(e)) => tracing::warn!(%job_id, error = %e, "failed to persist job outcome"),
            Err(e) => tracing::warn!(%job_id, error = %e, "job finish task failed"),
        }
    }
}
