//! Worker pool that drains the job queue.
//!
//! Each of the `concurrency` slots loops: claim the oldest queued job, run it
//! to a terminal state, repeat. An idle slot waits on the shared [`Notify`]
//! (signalled on submission) or the poll interval, whichever comes first.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use docpipe_core::outputs::{discover_outputs, job_output_dir};
use docpipe_core::progress::{ProgressParser, ProgressUpdate};
use docpipe_db::models::job::JobRecord;
use docpipe_db::repositories::Transition;
use docpipe_db::{DbPool, JobRepo, StoreError};
use docpipe_events::StatusBroadcaster;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::process::{self, ExecutionError, Launch};

/// Message reported to clients when a job completes.
pub const COMPLETION_MESSAGE: &str = "Processing complete";

/// Failure reason recorded for jobs interrupted by a restart.
pub const ORPHANED_REASON: &str = "Interrupted by service restart";

pub struct Executor {
    pool: DbPool,
    broadcaster: StatusBroadcaster,
    config: WorkerConfig,
    parser: Arc<dyn ProgressParser>,
    notify: Arc<Notify>,
}

impl Executor {
    pub fn new(pool: DbPool, broadcaster: StatusBroadcaster, config: WorkerConfig) -> Self {
        let parser: Arc<dyn ProgressParser> = Arc::from(config.progress_format.parser());
        Self {
            pool,
            broadcaster,
            config,
            parser,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Replace the progress parser selected by the configuration.
    pub fn with_parser(mut self, parser: Arc<dyn ProgressParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Handle used by submitters to wake an idle slot.
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Fail every job a previous process left running.
    ///
    /// Must be called before [`spawn`](Self::spawn).
    pub async fn recover_orphans(&self) -> Result<u64, StoreError> {
        let count = JobRepo::fail_orphaned(&self.pool, ORPHANED_REASON).await?;
        if count > 0 {
            tracing::warn!(count, "Failed jobs orphaned by previous run");
        }
        Ok(count)
    }

    /// Start the worker slots. They stop once `cancel` fires and any
    /// in-flight job has reached a terminal state.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let slots = self.config.concurrency.max(1);
        tracing::info!(
            slots,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            job_timeout_secs = self.config.job_timeout.as_secs(),
            "Executor started",
        );

        (0..slots)
            .map(|slot| {
                let executor = Arc::clone(&self);
                let cancel = cancel.clone();
                tokio::spawn(async move { executor.slot_loop(slot, cancel).await })
            })
            .collect()
    }

    async fn slot_loop(&self, slot: usize, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.run_next().await {
                // Work was found; look again straight away.
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => tracing::error!(slot, error = %e, "Failed to claim job"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        tracing::info!(slot, "Worker slot stopped");
    }

    /// Claim and run one job. Returns `false` when the queue was empty.
    pub async fn run_next(&self) -> Result<bool, StoreError> {
        let Some(job) = JobRepo::claim_next(&self.pool).await? else {
            return Ok(false);
        };
        tracing::info!(job_id = %job.id, user_id = %job.user_id, command = %job.spec.command, "Job claimed");
        self.execute(&job).await;
        Ok(true)
    }

    async fn execute(&self, job: &JobRecord) {
        match self.run_job(job).await {
            Ok(download_urls) => self.finish_completed(job, download_urls).await,
            Err(e) => self.finish_failed(job, e).await,
        }
    }

    /// Launch the job and collect its outputs. Every progress event of the
    /// job has been emitted by the time this returns.
    async fn run_job(&self, job: &JobRecord) -> Result<BTreeMap<String, String>, ExecutionError> {
        let output_dir = self.prepare_output_dir(&job.id).await?;

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_progress(
            self.pool.clone(),
            self.broadcaster.clone(),
            job.id.clone(),
            progress_rx,
        ));

        let outcome = process::run_process(
            Launch {
                job_id: &job.id,
                spec: &job.spec,
                output_dir: &output_dir,
                timeout: self.config.job_timeout,
            },
            Arc::clone(&self.parser),
            progress_tx,
        )
        .await;

        if let Err(e) = forwarder.await {
            tracing::warn!(job_id = %job.id, error = %e, "Progress forwarder failed");
        }

        let output = outcome?;
        if !output.stderr_tail.is_empty() {
            tracing::debug!(job_id = %job.id, stderr = %output.stderr_tail, "Job stderr");
        }

        let urls = discover_outputs(&output_dir, &job.id, &self.config.download_base).await?;
        tracing::info!(
            job_id = %job.id,
            duration_ms = output.duration_ms,
            outputs = urls.len(),
            "Job process succeeded",
        );
        Ok(urls)
    }

    async fn prepare_output_dir(&self, job_id: &str) -> Result<PathBuf, ExecutionError> {
        let dir = job_output_dir(&self.config.output_root, job_id);
        let wrap = |source: std::io::Error| ExecutionError::OutputDir {
            path: dir.clone(),
            source,
        };
        tokio::fs::create_dir_all(&dir).await.map_err(wrap)?;
        // The process runs in its own working directory.
        tokio::fs::canonicalize(&dir).await.map_err(wrap)
    }

    async fn finish_completed(&self, job: &JobRecord, download_urls: BTreeMap<String, String>) {
        let result = serde_json::json!({
            "message": COMPLETION_MESSAGE,
            "downloadUrls": download_urls,
        });

        match JobRepo::mark_completed(&self.pool, &job.id, &result).await {
            Ok(Transition::Applied) => {
                self.broadcaster
                    .completed(&job.id, COMPLETION_MESSAGE, &download_urls)
                    .await;
            }
            Ok(Transition::AlreadyApplied) => {
                tracing::warn!(job_id = %job.id, "Job already completed; event not repeated");
            }
            Err(e) => log_terminal_error(&job.id, &e),
        }
    }

    async fn finish_failed(&self, job: &JobRecord, error: ExecutionError) {
        let reason = error.to_string();
        tracing::warn!(job_id = %job.id, error = %reason, "Job failed");

        match JobRepo::mark_failed(&self.pool, &job.id, &reason, error.exit_code()).await {
            Ok(Transition::Applied) => {
                self.broadcaster.error(&job.id, &reason).await;
            }
            Ok(Transition::AlreadyApplied) => {
                tracing::warn!(job_id = %job.id, "Job already failed; event not repeated");
            }
            Err(e) => log_terminal_error(&job.id, &e),
        }
    }
}

fn log_terminal_error(job_id: &str, error: &StoreError) {
    match error {
        StoreError::InconsistentTransition { .. } => {
            tracing::error!(job_id = %job_id, error = %error, "BUG: conflicting terminal transition");
        }
        _ => {
            tracing::error!(job_id = %job_id, error = %error, "Failed to record job outcome");
        }
    }
}

/// Persist and broadcast each progress update of one job, in arrival order.
async fn forward_progress(
    pool: DbPool,
    broadcaster: StatusBroadcaster,
    job_id: String,
    mut updates: mpsc::UnboundedReceiver<ProgressUpdate>,
) {
    while let Some(update) = updates.recv().await {
        tracing::debug!(job_id = %job_id, percent = update.percent, message = %update.message, "Job progress");
        if let Err(e) = JobRepo::update_progress(&pool, &job_id, update.percent, &update.message).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to store progress");
        }
        broadcaster
            .progress(&job_id, update.percent, &update.message, &update.message)
            .await;
    }
}

