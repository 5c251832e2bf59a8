//! Wire-level constants for job status messages.
//!
//! Used by the status broadcaster when building the `{type, jobId, data,
//! timestamp}` envelope pushed to connected WebSocket clients.

/// Progress update during job execution (percentage + current step).
pub const MSG_TYPE_STATUS_UPDATE: &str = "status_update";

/// Job completed successfully; `data` carries the download references.
pub const MSG_TYPE_JOB_COMPLETED: &str = "job_completed";

/// Job failed; `data` carries a human-readable reason.
pub const MSG_TYPE_ERROR: &str = "error";

/// `status` field value inside a progress payload.
pub const STATUS_PROCESSING: &str = "processing";

/// `status` field value inside a completion payload.
pub const STATUS_COMPLETED: &str = "completed";

/// `status` field value inside an error payload.
pub const STATUS_FAILED: &str = "failed";

/// Environment variable carrying the job id into the external process.
pub const ENV_JOB_ID: &str = "JOB_ID";

/// Environment variable carrying the job's output directory into the external process.
pub const ENV_JOB_OUTPUT_DIR: &str = "JOB_OUTPUT_DIR";
