//! Repository for the `jobs` table.
//!
//! State transitions are guarded `UPDATE ... WHERE state = <expected>`
//! statements. When a guard matches no row the current state is read back
//! to tell an idempotent repeat from an illegal or inconsistent transition.

use chrono::Utc;
use docpipe_core::job::{JobState, NewJob};
use docpipe_core::types::Timestamp;

use crate::models::job::{JobRecord, JobRow};
use crate::{DbPool, StoreError};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, user_id, command, working_dir, payload, state, \
    progress_percent, progress_message, result, error_message, exit_code, \
    created_at, started_at, finished_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Outcome of a state-transition call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The record moved into the requested state.
    Applied,
    /// The record was already in the requested state; nothing changed.
    AlreadyApplied,
}

/// Provides queue and lifecycle operations for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new queued job. Returns as soon as the row is durable.
    pub async fn submit(pool: &DbPool, job: &NewJob) -> Result<JobRecord, StoreError> {
        let payload = serde_json::to_string(&job.spec.args).map_err(|e| StoreError::Corrupt {
            job_id: job.id.clone(),
            reason: format!("payload: {e}"),
        })?;

        let query = format!(
            "INSERT INTO jobs (id, user_id, command, working_dir, payload, state, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(&job.id)
            .bind(&job.user_id)
            .bind(&job.spec.command)
            .bind(&job.spec.working_dir)
            .bind(payload)
            .bind(JobState::Queued.as_str())
            .bind(Utc::now())
            .fetch_one(pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StoreError::Duplicate(job.id.clone())
                }
                other => StoreError::Unavailable(other),
            })?;

        row.try_into()
    }

    /// Find a job by its id.
    pub async fn find_by_id(pool: &DbPool, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(job_id)
            .fetch_optional(pool)
            .await?
            .map(JobRecord::try_from)
            .transpose()
    }

    /// Most recent jobs of a user, newest first. `limit` is capped at 100.
    pub async fn list_by_user(
        pool: &DbPool,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs WHERE user_id = ? ORDER BY seq DESC LIMIT ?"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(user_id)
            .bind(limit.clamp(1, MAX_LIMIT))
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(JobRecord::try_from)
            .collect()
    }

    /// Atomically move the oldest queued job to `running` and return it.
    ///
    /// A single `UPDATE ... RETURNING` statement, so two callers can never
    /// claim the same job.
    pub async fn claim_next(pool: &DbPool) -> Result<Option<JobRecord>, StoreError> {
        let query = format!(
            "UPDATE jobs SET state = ?, started_at = ? \
             WHERE seq = ( \
                 SELECT seq FROM jobs WHERE state = ? ORDER BY seq ASC LIMIT 1 \
             ) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(JobState::Running.as_str())
            .bind(Utc::now())
            .bind(JobState::Queued.as_str())
            .fetch_optional(pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let job_id = row.id.clone();

        match JobRecord::try_from(row) {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                // An undecodable record can never run; do not leave it running.
                tracing::error!(job_id = %job_id, error = %e, "Claimed corrupt job record");
                Self::fail_running(pool, &job_id, &e.to_string(), None).await?;
                Err(e)
            }
        }
    }

    /// `queued -> running` for a specific job.
    pub async fn mark_running(pool: &DbPool, job_id: &str) -> Result<Transition, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET state = ?, started_at = ? WHERE id = ? AND state = ?",
        )
        .bind(JobState::Running.as_str())
        .bind(Utc::now())
        .bind(job_id)
        .bind(JobState::Queued.as_str())
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(Transition::Applied);
        }
        Self::resolve_unapplied(pool, job_id, JobState::Running).await
    }

    /// `running -> completed`, storing the completion descriptor.
    ///
    /// Sets `progress_percent` to 100.
    pub async fn mark_completed(
        pool: &DbPool,
        job_id: &str,
        result: &serde_json::Value,
    ) -> Result<Transition, StoreError> {
        let outcome = sqlx::query(
            "UPDATE jobs \
             SET state = ?, result = ?, finished_at = ?, progress_percent = 100 \
             WHERE id = ? AND state = ?",
        )
        .bind(JobState::Completed.as_str())
        .bind(result.to_string())
        .bind(Utc::now())
        .bind(job_id)
        .bind(JobState::Running.as_str())
        .execute(pool)
        .await?;

        if outcome.rows_affected() > 0 {
            return Ok(Transition::Applied);
        }
        Self::resolve_unapplied(pool, job_id, JobState::Completed).await
    }

    /// `running -> failed` with a human-readable reason.
    ///
    /// No automatic retry is performed; a retry is a new submission.
    pub async fn mark_failed(
        pool: &DbPool,
        job_id: &str,
        error: &str,
        exit_code: Option<i32>,
    ) -> Result<Transition, StoreError> {
        if Self::fail_running(pool, job_id, error, exit_code).await? {
            return Ok(Transition::Applied);
        }
        Self::resolve_unapplied(pool, job_id, JobState::Failed).await
    }

    /// Record the last reported progress of a running job.
    ///
    /// Returns `false` when the job is not running (late or stray update).
    pub async fn update_progress(
        pool: &DbPool,
        job_id: &str,
        percent: u8,
        message: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET progress_percent = ?, progress_message = ? \
             WHERE id = ? AND state = ?",
        )
        .bind(i64::from(percent))
        .bind(message)
        .bind(job_id)
        .bind(JobState::Running.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete terminal jobs that finished before `older_than`, or that fall
    /// outside the newest `keep_latest` terminal jobs.
    ///
    /// Queued and running jobs are never touched. Returns the number of rows
    /// removed.
    pub async fn prune_terminal(
        pool: &DbPool,
        older_than: Timestamp,
        keep_latest: i64,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM jobs \
             WHERE state IN (?, ?) \
               AND (finished_at < ? \
                    OR seq NOT IN ( \
                        SELECT seq FROM jobs WHERE state IN (?, ?) \
                        ORDER BY finished_at DESC, seq DESC LIMIT ? \
                    ))",
        )
        .bind(JobState::Completed.as_str())
        .bind(JobState::Failed.as_str())
        .bind(older_than)
        .bind(JobState::Completed.as_str())
        .bind(JobState::Failed.as_str())
        .bind(keep_latest.max(0))
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Fail every job left `running` by a previous process.
    ///
    /// Called once at startup before any worker slot starts.
    pub async fn fail_orphaned(pool: &DbPool, reason: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET state = ?, error_message = ?, finished_at = ? WHERE state = ?",
        )
        .bind(JobState::Failed.as_str())
        .bind(reason)
        .bind(Utc::now())
        .bind(JobState::Running.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Number of jobs currently in `state`.
    pub async fn count_in_state(pool: &DbPool, state: JobState) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs WHERE state = ?")
            .bind(state.as_str())
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn fail_running(
        pool: &DbPool,
        job_id: &str,
        error: &str,
        exit_code: Option<i32>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET state = ?, error_message = ?, exit_code = ?, finished_at = ? \
             WHERE id = ? AND state = ?",
        )
        .bind(JobState::Failed.as_str())
        .bind(error)
        .bind(exit_code)
        .bind(Utc::now())
        .bind(job_id)
        .bind(JobState::Running.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn current_state(pool: &DbPool, job_id: &str) -> Result<Option<JobState>, StoreError> {
        let state = sqlx::query_scalar::<_, String>("SELECT state FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(pool)
            .await?;

        state
            .map(|s| {
                s.parse().map_err(|e: docpipe_core::error::CoreError| StoreError::Corrupt {
                    job_id: job_id.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Classify a guarded update that matched no row.
    async fn resolve_unapplied(
        pool: &DbPool,
        job_id: &str,
        target: JobState,
    ) -> Result<Transition, StoreError> {
        let current = Self::current_state(pool, job_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;

        if current == target {
            return Ok(Transition::AlreadyApplied);
        }
        if current.is_terminal() && target.is_terminal() {
            return Err(StoreError::InconsistentTransition {
                job_id: job_id.to_string(),
                current,
                attempted: target,
            });
        }
        Err(StoreError::InvalidTransition {
            job_id: job_id.to_string(),
            from: current,
            to: target,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
