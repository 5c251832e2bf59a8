//! Supervised launch of a job's external process.
//!
//! stdout is read line by line while the process runs; every line that
//! carries progress is forwarded, in order, on a channel. stderr is kept as a
//! bounded tail for the failure reason. The call returns only after the
//! stdout reader has finished or been abandoned, so every progress update
//! precedes the outcome.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use docpipe_core::job::CommandSpec;
use docpipe_core::job_events::{ENV_JOB_ID, ENV_JOB_OUTPUT_DIR};
use docpipe_core::progress::{ProgressParser, ProgressUpdate};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// stderr lines kept for the failure reason.
const STDERR_TAIL_LINES: usize = 20;

/// Longest single output line kept; the rest of a longer line is discarded
/// while reading.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// How long the output readers may run after the process has exited. A
/// background child that inherited the pipes keeps them open past the exit.
const POST_EXIT_DRAIN: Duration = Duration::from_secs(2);

/// Why a job did not complete.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot prepare output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Non-zero exit, or termination by a signal (`exit_code` is `None`).
    #[error("{}", describe_exit(*exit_code, stderr))]
    ExitStatus {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutionError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ExitStatus { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

fn describe_exit(exit_code: Option<i32>, stderr: &str) -> String {
    let head = match exit_code {
        Some(code) => format!("Process exited with code {code}"),
        None => "Process terminated by signal".to_string(),
    };
    if stderr.is_empty() {
        head
    } else {
        format!("{head}: {stderr}")
    }
}

/// Everything needed to start one job's process.
#[derive(Debug, Clone, Copy)]
pub struct Launch<'a> {
    pub job_id: &'a str,
    pub spec: &'a CommandSpec,
    pub output_dir: &'a Path,
    pub timeout: Duration,
}

/// A process that exited successfully.
#[derive(Debug)]
pub struct ProcessOutput {
    pub duration_ms: u64,
    /// Last stderr lines, for diagnostics.
    pub stderr_tail: String,
}

/// Run a job's process to completion.
///
/// Progress updates are sent on `progress_tx` as they are parsed. The
/// sender is dropped before this returns, so a consumer draining the channel
/// sees it close once the last update has been delivered.
pub async fn run_process(
    launch: Launch<'_>,
    parser: Arc<dyn ProgressParser>,
    progress_tx: mpsc::UnboundedSender<ProgressUpdate>,
) -> Result<ProcessOutput, ExecutionError> {
    let args = launch.spec.resolve_args(launch.job_id, launch.output_dir);

    let mut cmd = Command::new(&launch.spec.command);
    cmd.args(&args)
        .current_dir(&launch.spec.working_dir)
        .env(ENV_JOB_ID, launch.job_id)
        .env(ENV_JOB_OUTPUT_DIR, launch.output_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| ExecutionError::Spawn {
        command: launch.spec.command.clone(),
        source,
    })?;
    tracing::debug!(
        job_id = %launch.job_id,
        pid = child.id(),
        command = %launch.spec.command,
        "Job process started",
    );

    let mut stdout_task = {
        let stdout = child.stdout.take();
        let job_id = launch.job_id.to_string();
        tokio::spawn(async move {
            if let Some(stdout) = stdout {
                read_progress(stdout, &job_id, parser.as_ref(), &progress_tx).await;
            }
        })
    };
    let mut stderr_task = {
        let stderr = child.stderr.take();
        tokio::spawn(async move {
            match stderr {
                Some(stderr) => read_tail(stderr, STDERR_TAIL_LINES).await,
                None => String::new(),
            }
        })
    };

    let status = match tokio::time::timeout(launch.timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            stdout_task.abort();
            stderr_task.abort();
            return Err(ExecutionError::Io(e));
        }
        Err(_elapsed) => {
            if let Err(e) = child.kill().await {
                tracing::warn!(job_id = %launch.job_id, error = %e, "Failed to kill timed-out process");
            }
            // A surviving grandchild may still hold the pipes open.
            stdout_task.abort();
            stderr_task.abort();
            return Err(ExecutionError::Timeout(launch.timeout));
        }
    };

    let deadline = tokio::time::Instant::now() + POST_EXIT_DRAIN;

    match tokio::time::timeout_at(deadline, &mut stdout_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(job_id = %launch.job_id, error = %e, "stdout reader task failed");
        }
        Err(_elapsed) => {
            tracing::warn!(
                job_id = %launch.job_id,
                "stdout still open after process exit; abandoning reader",
            );
            stdout_task.abort();
        }
    }
    let stderr_tail = match tokio::time::timeout_at(deadline, &mut stderr_task).await {
        Ok(tail) => tail.unwrap_or_default(),
        Err(_elapsed) => {
            stderr_task.abort();
            String::new()
        }
    };
    let duration_ms = start.elapsed().as_millis() as u64;

    if status.success() {
        tracing::debug!(job_id = %launch.job_id, duration_ms, "Job process exited cleanly");
        Ok(ProcessOutput {
            duration_ms,
            stderr_tail,
        })
    } else {
        Err(ExecutionError::ExitStatus {
            exit_code: status.code(),
            stderr: stderr_tail,
        })
    }
}

/// Read `reader` line by line, forwarding parsed progress in order.
async fn read_progress<R: AsyncRead + Unpin>(
    reader: R,
    job_id: &str,
    parser: &dyn ProgressParser,
    progress_tx: &mpsc::UnboundedSender<ProgressUpdate>,
) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match read_capped_line(&mut reader, &mut buf, MAX_LINE_BYTES).await {
            Ok(0) => break,
            Ok(_) => {
                let line = decode_line(&buf);
                match parser.parse_line(&line) {
                    Some(update) => {
                        if progress_tx.send(update).is_err() {
                            tracing::debug!(job_id = %job_id, "Progress consumer gone");
                        }
                    }
                    None => tracing::trace!(job_id = %job_id, line = %line, "stdout"),
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "stdout read failed");
                break;
            }
        }
    }
}

/// Keep the last `max_lines` lines of `reader`, joined with newlines.
async fn read_tail<R: AsyncRead + Unpin>(reader: R, max_lines: usize) -> String {
    let mut reader = BufReader::new(reader);
    let mut tail: VecDeque<String> = VecDeque::with_capacity(max_lines);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match read_capped_line(&mut reader, &mut buf, MAX_LINE_BYTES).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = decode_line(&buf);
                if line.trim().is_empty() {
                    continue;
                }
                if tail.len() == max_lines {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
    }
    Vec::from(tail).join("\n")
}

/// Read one `\n`-terminated line, appending at most `cap` bytes of it to
/// `buf`. Returns the number of bytes consumed from `reader`; 0 means EOF.
async fn read_capped_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    cap: usize,
) -> std::io::Result<usize> {
    let mut consumed = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(consumed);
        }
        let (chunk_len, line_done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        let keep = chunk_len.min(cap.saturating_sub(buf.len()));
        buf.extend_from_slice(&available[..keep]);
        reader.consume(chunk_len);
        consumed += chunk_len;
        if line_done {
            return Ok(consumed);
        }
    }
}

fn decode_line(buf: &[u8]) -> String {
    String::from_utf8_lossy(buf)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}
