//! Job record model for the `jobs` table.

use docpipe_core::job::{CommandSpec, JobArgs, JobState};
use docpipe_core::types::{JobId, Timestamp, UserId};
use serde::Serialize;
use sqlx::FromRow;

use crate::StoreError;

/// Raw row as stored; JSON and enum columns are still text.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct JobRow {
    pub id: String,
    pub user_id: String,
    pub command: String,
    pub working_dir: String,
    pub payload: String,
    pub state: String,
    pub progress_percent: i64,
    pub progress_message: Option<String>,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub exit_code: Option<i64>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

/// A job as seen by the rest of the system.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    #[serde(rename = "jobId")]
    pub id: JobId,
    pub user_id: UserId,
    #[serde(flatten)]
    pub spec: CommandSpec,
    pub state: JobState,
    /// Last reported progress, kept for clients that poll.
    pub progress_percent: u8,
    pub progress_message: Option<String>,
    /// Completion descriptor (`{message, downloadUrls}`) once completed.
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub exit_code: Option<i32>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            job_id: row.id.clone(),
            reason,
        };

        let state: JobState = row
            .state
            .parse()
            .map_err(|e: docpipe_core::error::CoreError| corrupt(e.to_string()))?;
        let args: JobArgs = serde_json::from_str(&row.payload)
            .map_err(|e| corrupt(format!("payload: {e}")))?;
        let result: Option<serde_json::Value> = row
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| corrupt(format!("result: {e}")))?;

        Ok(Self {
            spec: CommandSpec {
                command: row.command,
                working_dir: row.working_dir,
                args,
            },
            state,
            progress_percent: row.progress_percent.clamp(0, 100) as u8,
            progress_message: row.progress_message,
            result,
            error_message: row.error_message,
            exit_code: row.exit_code.map(|c| c as i32),
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            user_id: row.user_id,
            id: row.id,
        })
    }
}
