use std::path::PathBuf;
use std::time::Duration;

use docpipe_core::progress::ProgressFormat;

/// Default per-job wall-clock limit.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);

/// Settings for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of jobs that may run at the same time.
    pub concurrency: usize,
    /// Parent of every job's output directory.
    pub output_root: PathBuf,
    /// A job still running after this long is killed and failed.
    pub job_timeout: Duration,
    /// Fallback queue poll when no submission wake-up arrives.
    pub poll_interval: Duration,
    /// Prefix of download references reported on completion.
    pub download_base: String,
    pub progress_format: ProgressFormat,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            output_root: PathBuf::from("./output"),
            job_timeout: DEFAULT_JOB_TIMEOUT,
            poll_interval: Duration::from_secs(1),
            download_base: "/api/v1/jobs".to_string(),
            progress_format: ProgressFormat::Marker,
        }
    }
}
