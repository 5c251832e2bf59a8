use std::path::PathBuf;
use std::time::Duration;

use docpipe_core::progress::ProgressFormat;
use docpipe_worker::WorkerConfig;

/// How long finished jobs are kept before the retention task prunes them.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Terminal jobs older than this many hours are deleted.
    pub max_age_hours: i64,
    /// At most this many terminal jobs are kept regardless of age.
    pub max_jobs: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_hours: 24,
            max_jobs: 1000,
        }
    }
}

impl RetentionConfig {
    /// Longest accepted retention window (ten years).
    pub const MAX_AGE_HOURS: i64 = 24 * 365 * 10;

    /// Build a retention policy, rejecting negative or out-of-range values.
    pub fn new(max_age_hours: i64, max_jobs: i64) -> Result<Self, String> {
        if !(0..=Self::MAX_AGE_HOURS).contains(&max_age_hours) {
            return Err(format!(
                "JOB_RETENTION_HOURS must be within 0..={}, got {max_age_hours}",
                Self::MAX_AGE_HOURS
            ));
        }
        if max_jobs < 0 {
            return Err(format!("JOB_RETENTION_MAX must not be negative, got {max_jobs}"));
        }
        Ok(Self {
            max_age_hours,
            max_jobs,
        })
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    pub database_url: String,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    pub retention: RetentionConfig,
    pub worker: WorkerConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                       |
    /// |---------------------------|-------------------------------|
    /// | `HOST`                    | `0.0.0.0`                     |
    /// | `PORT`                    | `3000`                        |
    /// | `DATABASE_URL`            | `sqlite:docpipe.db?mode=rwc`  |
    /// | `CORS_ORIGINS`            | `http://localhost:5173`       |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                          |
    /// | `WORKER_CONCURRENCY`      | `2`                           |
    /// | `JOB_OUTPUT_ROOT`         | `./output`                    |
    /// | `JOB_TIMEOUT_SECS`        | `300`                         |
    /// | `WORKER_POLL_INTERVAL_MS` | `1000`                        |
    /// | `PROGRESS_FORMAT`         | `marker` (`marker` or `json`) |
    /// | `DOWNLOAD_BASE_URL`       | `/api/v1/jobs`                |
    /// | `JOB_RETENTION_HOURS`     | `24`                          |
    /// | `JOB_RETENTION_MAX`       | `1000`                        |
    ///
    /// Panics on malformed values; misconfiguration should fail at startup.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = parse_env("PORT", "3000");

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:docpipe.db?mode=rwc".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = parse_env("REQUEST_TIMEOUT_SECS", "30");

        let progress_format = std::env::var("PROGRESS_FORMAT").unwrap_or_else(|_| "marker".into());
        let progress_format = ProgressFormat::parse(&progress_format).unwrap_or_else(|| {
            panic!("PROGRESS_FORMAT must be 'marker' or 'json', got '{progress_format}'")
        });

        let worker = WorkerConfig {
            concurrency: parse_env("WORKER_CONCURRENCY", "2"),
            output_root: PathBuf::from(
                std::env::var("JOB_OUTPUT_ROOT").unwrap_or_else(|_| "./output".into()),
            ),
            job_timeout: Duration::from_secs(parse_env("JOB_TIMEOUT_SECS", "300")),
            poll_interval: Duration::from_millis(parse_env("WORKER_POLL_INTERVAL_MS", "1000")),
            download_base: std::env::var("DOWNLOAD_BASE_URL")
                .unwrap_or_else(|_| "/api/v1/jobs".into()),
            progress_format,
        };

        let retention = RetentionConfig::new(
            parse_env("JOB_RETENTION_HOURS", "24"),
            parse_env("JOB_RETENTION_MAX", "1000"),
        )
        .unwrap_or_else(|e| panic!("{e}"));

        Self {
            host,
            port,
            database_url,
            cors_origins,
            request_timeout_secs,
            retention,
            worker,
        }
    }
}

fn parse_env<T>(name: &str, default: &str) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.into());
    raw.parse()
        .unwrap_or_else(|e| panic!("{name} must be a valid {}: {e}", std::any::type_name::<T>()))
}
