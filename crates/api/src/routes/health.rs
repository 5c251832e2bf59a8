use axum::extract::State;
use axum::{routing::get, Json, Router};
use docpipe_core::job::JobState;
use docpipe_db::JobRepo;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the job store is reachable.
    pub db_healthy: bool,
    /// Jobs waiting for a worker slot; absent when the store is down.
    pub queued_jobs: Option<i64>,
    pub running_jobs: Option<i64>,
    /// Live delivery channels.
    pub connections: usize,
}

/// GET /health -- returns service, job store and queue health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = docpipe_db::health_check(&state.pool).await.is_ok();

    let (queued_jobs, running_jobs) = if db_healthy {
        (
            JobRepo::count_in_state(&state.pool, JobState::Queued).await.ok(),
            JobRepo::count_in_state(&state.pool, JobState::Running).await.ok(),
        )
    } else {
        (None, None)
    };

    let status = if db_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        queued_jobs,
        running_jobs,
        connections: state.registry.connection_count().await,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
