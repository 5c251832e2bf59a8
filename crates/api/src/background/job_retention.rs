//! Periodic pruning of finished jobs.
//!
//! Terminal job records are deleted once they are older than the retention
//! window or fall outside the newest `max_jobs` terminal records. Their
//! output directories are left on disk.

use std::time::Duration;

use chrono::Utc;
use docpipe_db::{DbPool, JobRepo, StoreError};
use tokio_util::sync::CancellationToken;

use crate::config::RetentionConfig;

/// How often the cleanup job runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600); // 1 hour

/// Run a single pruning pass. Returns the number of records removed.
pub async fn prune_once(pool: &DbPool, retention: &RetentionConfig) -> Result<u64, StoreError> {
    let cutoff = Utc::now() - chrono::Duration::hours(retention.max_age_hours);
    JobRepo::prune_terminal(pool, cutoff, retention.max_jobs).await
}

/// Run the job retention loop until `cancel` is triggered.
pub async fn run(pool: DbPool, retention: RetentionConfig, cancel: CancellationToken) {
    tracing::info!(
        max_age_hours = retention.max_age_hours,
        max_jobs = retention.max_jobs,
        interval_secs = CLEANUP_INTERVAL.as_secs(),
        "Job retention task started"
    );

    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention task stopping");
                break;
            }
            _ = interval.tick() => {
                match prune_once(&pool, &retention).await {
                    Ok(deleted) if deleted > 0 => {
                        tracing::info!(deleted, "Job retention: pruned finished jobs");
                    }
                    Ok(_) => tracing::debug!("Job retention: nothing to prune"),
                    Err(e) => tracing::error!(error = %e, "Job retention: cleanup failed"),
                }
            }
        }
    }
}
