//! Handlers for the `/jobs` resource.
//!
//! Every job is visible to its owner only.

use std::path::Path as FsPath;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use docpipe_core::error::CoreError;
use docpipe_core::job::JobSubmission;
use docpipe_core::outputs::{content_type, is_recognized_output, job_output_dir};
use docpipe_db::models::job::JobRecord;
use docpipe_db::{DbPool, JobRepo};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::middleware::identity::UserIdentity;
use crate::response::DataResponse;
use crate::state::AppState;

/// Default page size for job listing.
const DEFAULT_LIST_LIMIT: i64 = 50;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fetch a job and verify the caller owns it.
async fn find_and_authorize(
    pool: &DbPool,
    job_id: &str,
    caller: &UserIdentity,
) -> AppResult<JobRecord> {
    let job = JobRepo::find_by_id(pool, job_id)
        .await?
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "Job",
                id: job_id.to_string(),
            })
        })?;

    if job.user_id != caller.user_id {
        return Err(AppError::Core(CoreError::Forbidden(
            "Cannot access another user's job".into(),
        )));
    }

    Ok(job)
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Validate and enqueue a job. Returns 201 with the queued record as soon as
/// it is durable; execution happens later on a worker slot.
pub async fn submit_job(
    caller: UserIdentity,
    State(state): State<AppState>,
    payload: Result<Json<JobSubmission>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(submission) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let new_job = submission.validate(&caller.user_id)?;

    let job = JobRepo::submit(&state.pool, &new_job).await?;
    state.queue_notify.notify_one();

    tracing::info!(
        job_id = %job.id,
        user_id = %job.user_id,
        command = %job.spec.command,
        "Job submitted",
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<i64>,
}

/// GET /api/v1/jobs
///
/// The caller's most recent jobs, newest first.
pub async fn list_jobs(
    caller: UserIdentity,
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> AppResult<Json<DataResponse<Vec<JobRecord>>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let jobs = JobRepo::list_by_user(&state.pool, &caller.user_id, limit).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
///
/// Includes the last reported progress, for clients that missed live events.
pub async fn get_job(
    caller: UserIdentity,
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<DataResponse<JobRecord>>> {
    let job = find_and_authorize(&state.pool, &job_id, &caller).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/files/{name}
///
/// Serve one recognised output file from the job's output directory.
pub async fn download_file(
    caller: UserIdentity,
    State(state): State<AppState>,
    Path((job_id, file_name)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let job = find_and_authorize(&state.pool, &job_id, &caller).await?;

    if !is_plain_file_name(&file_name) || !is_recognized_output(FsPath::new(&file_name)) {
        return Err(AppError::BadRequest(format!(
            "'{file_name}' is not a downloadable output"
        )));
    }

    let path = job_output_dir(&state.config.worker.output_root, &job.id).join(&file_name);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::Core(CoreError::NotFound {
                entity: "File",
                id: file_name,
            }));
        }
        Err(e) => {
            return Err(AppError::InternalError(format!(
                "Failed to read {}: {e}",
                path.display()
            )));
        }
    };

    tracing::debug!(job_id = %job.id, file = %file_name, size = bytes.len(), "Serving job output");

    Ok((
        [
            (header::CONTENT_TYPE, content_type(&path).to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    ))
}

/// A single path component with no traversal or separators.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && !name.starts_with('.')
}
