//! Durable job store backed by SQLite.
//!
//! Exposes pool construction, embedded migrations and the [`JobRepo`]
//! repository. Every mutation is a single SQL statement so concurrent
//! callers (HTTP handlers, worker slots, the retention task) never observe a
//! half-applied transition.

use std::str::FromStr;

use docpipe_core::job::JobState;
use docpipe_core::types::JobId;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub mod models;
pub mod repositories;

pub use repositories::JobRepo;

pub type DbPool = sqlx::SqlitePool;

/// Connection cap for file-backed databases.
const MAX_CONNECTIONS: u32 = 8;

/// Create a connection pool from a database URL.
///
/// In-memory databases live only as long as their connection, so they get a
/// single connection that is never recycled.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

    let mut options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(MAX_CONNECTIONS)
    };

    pool_options.connect_with(options).await
}

/// Apply the embedded migrations in `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Cheap liveness check.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Errors surfaced by the job store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database could not be reached or rejected the statement.
    #[error("Job store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job id already exists: {0}")]
    Duplicate(JobId),

    /// A transition the state machine does not allow (e.g. completing a
    /// job that never started).
    #[error("Illegal transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobState,
        to: JobState,
    },

    /// A second, different terminal transition on an already-terminal job.
    /// Indicates a bug in the caller rather than a job failure.
    #[error("Inconsistent terminal transition for job {job_id}: already {current}, attempted {attempted}")]
    InconsistentTransition {
        job_id: JobId,
        current: JobState,
        attempted: JobState,
    },

    /// A stored row could not be decoded.
    #[error("Corrupt job record {job_id}: {reason}")]
    Corrupt { job_id: JobId, reason: String },
}

/// Test helpers shared by this crate's tests and downstream crates.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::{create_pool, run_migrations, DbPool};

    /// Fresh, migrated in-memory database.
    pub async fn memory_pool() -> DbPool {
        let pool = create_pool("sqlite::memory:")
            .await
            .expect("open in-memory sqlite");
        run_migrations(&pool).await.expect("apply migrations");
        pool
    }
}
