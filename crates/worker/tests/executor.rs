//! End-to-end tests for `Executor`.
//!
//! Jobs run small `/bin/sh` scripts written to a temp directory. Status
//! events are observed through a channel registered for the job owner.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use docpipe_core::job::{CommandSpec, JobArgs, JobState, NewJob};
use docpipe_core::progress::JsonLineParser;
use docpipe_db::testing::memory_pool;
use docpipe_db::{DbPool, JobRepo};
use docpipe_events::{ConnectionRegistry, Frame, StatusBroadcaster, StatusMessage};
use docpipe_worker::{Executor, WorkerConfig};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

const OWNER: &str = "u1";

struct Harness {
    pool: DbPool,
    executor: Arc<Executor>,
    events: UnboundedReceiver<Frame>,
    scripts: TempDir,
    output: TempDir,
}

async fn harness(job_timeout: Duration) -> Harness {
    harness_with(job_timeout, |executor| executor).await
}

async fn harness_with(
    job_timeout: Duration,
    customize: impl FnOnce(Executor) -> Executor,
) -> Harness {
    let pool = memory_pool().await;
    let registry = Arc::new(ConnectionRegistry::new());
    let events = registry.connect("conn-1", OWNER).await;

    let scripts = tempfile::tempdir().expect("scripts dir");
    let output = tempfile::tempdir().expect("output dir");

    let config = WorkerConfig {
        concurrency: 2,
        output_root: output.path().to_path_buf(),
        job_timeout,
        poll_interval: Duration::from_millis(50),
        ..WorkerConfig::default()
    };
    let broadcaster = StatusBroadcaster::new(pool.clone(), registry);
    let executor = Arc::new(customize(Executor::new(
        pool.clone(),
        broadcaster,
        config,
    )));

    Harness {
        pool,
        executor,
        events,
        scripts,
        output,
    }
}

impl Harness {
    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.scripts.path().join(name);
        std::fs::write(&path, body).expect("write script");
        path
    }

    async fn submit_script(&self, job_id: &str, script: &Path, extra: &[&str]) {
        let mut args = vec![script.display().to_string()];
        args.extend(extra.iter().map(|s| s.to_string()));
        self.submit(job_id, "/bin/sh", args).await;
    }

    async fn submit(&self, job_id: &str, command: &str, args: Vec<String>) {
        JobRepo::submit(
            &self.pool,
            &NewJob {
                id: job_id.into(),
                user_id: OWNER.into(),
                spec: CommandSpec {
                    command: command.into(),
                    working_dir: self.scripts.path().display().to_string(),
                    args: JobArgs::List(args),
                },
            },
        )
        .await
        .expect("submit job");
    }

    fn drain(&mut self) -> Vec<StatusMessage> {
        let mut messages = Vec::new();
        while let Ok(frame) = self.events.try_recv() {
            match frame {
                Frame::Text(text) => {
                    messages.push(serde_json::from_str(&text).expect("status message json"))
                }
                other => panic!("unexpected frame {other:?}"),
            }
        }
        messages
    }
}

fn types(messages: &[StatusMessage]) -> Vec<&str> {
    messages.iter().map(|m| m.message_type.as_str()).collect()
}

// ---------------------------------------------------------------------------
// Test: successful job reports progress, then completion with its outputs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_job_reports_progress_then_completion() {
    let mut h = harness(Duration::from_secs(30)).await;
    let script = h.script(
        "extract",
        r#"
echo "starting $1"
echo "PROGRESS: 40 parsing"
echo "rows" > "$JOB_OUTPUT_DIR/report.xlsx"
echo "noise" > "$JOB_OUTPUT_DIR/trace.log"
printf '{"jobId":"%s"}' "$JOB_ID" > "$JOB_OUTPUT_DIR/summary.json"
"#,
    );
    h.submit_script("j1", &script, &["doc.pdf"]).await;

    assert!(h.executor.run_next().await.unwrap());

    let messages = h.drain();
    assert_eq!(types(&messages), vec!["status_update", "job_completed"]);

    let progress = &messages[0];
    assert_eq!(progress.job_id, "j1");
    assert_eq!(progress.data["progress"], 40);
    assert_eq!(progress.data["currentStep"], "parsing");

    let completed = &messages[1];
    assert_eq!(completed.data["status"], "completed");
    let urls = completed.data["downloadUrls"].as_object().unwrap();
    assert_eq!(urls.len(), 2);
    assert_eq!(urls["report"], "/api/v1/jobs/j1/files/report.xlsx");
    assert_eq!(urls["summary"], "/api/v1/jobs/j1/files/summary.json");

    let job = JobRepo::find_by_id(&h.pool, "j1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.progress_percent, 100);
    assert_eq!(
        job.result.as_ref().unwrap()["downloadUrls"]["report"],
        "/api/v1/jobs/j1/files/report.xlsx"
    );

    let summary = std::fs::read_to_string(h.output.path().join("j1/summary.json")).unwrap();
    assert_eq!(summary, r#"{"jobId":"j1"}"#);
}

// ---------------------------------------------------------------------------
// Test: non-zero exit fails the job with exactly one error event
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_zero_exit_emits_single_error_event() {
    let mut h = harness(Duration::from_secs(30)).await;
    let script = h.script(
        "broken",
        r#"
echo "PROGRESS: 10 loading"
echo "unsupported file format" >&2
exit 2
"#,
    );
    h.submit_script("j2", &script, &[]).await;

    h.executor.run_next().await.unwrap();

    let messages = h.drain();
    assert_eq!(types(&messages), vec!["status_update", "error"]);
    let error = messages[1].data["error"].as_str().unwrap();
    assert!(error.contains("code 2"), "{error}");
    assert!(error.contains("unsupported file format"), "{error}");

    let job = JobRepo::find_by_id(&h.pool, "j2").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.exit_code, Some(2));
    assert_eq!(job.progress_percent, 10);
}

// ---------------------------------------------------------------------------
// Test: out-of-range progress is clamped
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progress_over_100_is_clamped() {
    let mut h = harness(Duration::from_secs(30)).await;
    let script = h.script("overshoot", "echo 'PROGRESS: 150 done'\n");
    h.submit_script("j3", &script, &[]).await;

    h.executor.run_next().await.unwrap();

    let messages = h.drain();
    assert_eq!(messages[0].data["progress"], 100);
    assert_eq!(messages[0].data["message"], "done");
}

// ---------------------------------------------------------------------------
// Test: progress events keep stdout order and precede the terminal event
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_keep_output_order_and_terminal_is_last() {
    let mut h = harness(Duration::from_secs(30)).await;
    let script = h.script(
        "steps",
        r#"
for p in 10 80 30 90; do echo "PROGRESS: $p step $p"; done
"#,
    );
    h.submit_script("j4", &script, &[]).await;

    h.executor.run_next().await.unwrap();

    let messages = h.drain();
    let percents: Vec<_> = messages[..4]
        .iter()
        .map(|m| m.data["progress"].as_u64().unwrap())
        .collect();
    assert_eq!(percents, vec![10, 80, 30, 90]);
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[4].message_type, "job_completed");
}

// ---------------------------------------------------------------------------
// Test: a job exceeding its timeout is killed and failed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timed_out_job_is_failed() {
    let mut h = harness(Duration::from_millis(300)).await;
    let script = h.script("slow", "echo 'PROGRESS: 5 waiting'\nexec sleep 10\n");
    h.submit_script("j5", &script, &[]).await;

    tokio::time::timeout(Duration::from_secs(5), h.executor.run_next())
        .await
        .expect("timeout enforced")
        .unwrap();

    let messages = h.drain();
    assert_eq!(messages.last().unwrap().message_type, "error");
    assert_eq!(
        messages.iter().filter(|m| m.message_type == "error").count(),
        1
    );

    let job = JobRepo::find_by_id(&h.pool, "j5").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(job.error_message.unwrap().contains("Timed out"));
}

// ---------------------------------------------------------------------------
// Test: a background child holding stdout open does not block the slot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn background_child_does_not_hold_slot_past_exit() {
    let mut h = harness(Duration::from_secs(1)).await;
    let script = h.script("detach", "echo 'PROGRESS: 10 go'\nsleep 8 &\nexit 0\n");
    h.submit_script("j5b", &script, &[]).await;

    let started = std::time::Instant::now();
    tokio::time::timeout(Duration::from_secs(6), h.executor.run_next())
        .await
        .expect("slot released after process exit")
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());

    let messages = h.drain();
    assert_eq!(types(&messages), vec!["status_update", "job_completed"]);
    assert_eq!(messages[0].data["progress"], 10);

    let job = JobRepo::find_by_id(&h.pool, "j5b").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
}

// ---------------------------------------------------------------------------
// Test: a replacement parser understands JSON progress lines
// ---------------------------------------------------------------------------

#[tokio::test]
async fn json_progress_parser_can_be_plugged_in() {
    let mut h = harness_with(Duration::from_secs(30), |executor| {
        executor.with_parser(Arc::new(JsonLineParser))
    })
    .await;
    let script = h.script(
        "json",
        r#"
echo 'PROGRESS: 99 ignored'
echo '{"progress": 25, "message": "reading"}'
echo '{"progress": 75.4, "message": "writing"}'
"#,
    );
    h.submit_script("j5c", &script, &[]).await;

    h.executor.run_next().await.unwrap();

    let messages = h.drain();
    assert_eq!(
        types(&messages),
        vec!["status_update", "status_update", "job_completed"]
    );
    assert_eq!(messages[0].data["progress"], 25);
    assert_eq!(messages[0].data["message"], "reading");
    assert_eq!(messages[1].data["progress"], 75);
}

// ---------------------------------------------------------------------------
// Test: a command that cannot be started fails the job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn spawn_failure_fails_job() {
    let mut h = harness(Duration::from_secs(30)).await;
    h.submit("j6", "/definitely/not/a/tool", vec![]).await;

    h.executor.run_next().await.unwrap();

    let messages = h.drain();
    assert_eq!(types(&messages), vec!["error"]);
    let job = JobRepo::find_by_id(&h.pool, "j6").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(job.error_message.unwrap().contains("Failed to start"));
}

// ---------------------------------------------------------------------------
// Test: empty queue is reported without side effects
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_queue_returns_false() {
    let mut h = harness(Duration::from_secs(30)).await;

    assert!(!h.executor.run_next().await.unwrap());
    assert!(h.drain().is_empty());
}

// ---------------------------------------------------------------------------
// Test: running slots pick up a submission after a wake-up
// ---------------------------------------------------------------------------

#[tokio::test]
async fn slots_drain_queue_until_cancelled() {
    let h = harness(Duration::from_secs(30)).await;
    let cancel = CancellationToken::new();
    let handles = Arc::clone(&h.executor).spawn(cancel.clone());

    let script = h.script("quick", "echo 'PROGRESS: 50 half'\n");
    for id in ["a", "b", "c"] {
        h.submit_script(id, &script, &[]).await;
        h.executor.notifier().notify_one();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let done = JobRepo::count_in_state(&h.pool, JobState::Completed)
            .await
            .unwrap();
        if done == 3 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "jobs did not finish");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    cancel.cancel();
    for handle in handles {
        handle.await.unwrap();
    }
}

// ---------------------------------------------------------------------------
// Test: jobs left running by a previous process are failed at startup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn orphaned_jobs_are_recovered() {
    let mut h = harness(Duration::from_secs(30)).await;
    h.submit("j7", "/bin/true", vec![]).await;
    JobRepo::claim_next(&h.pool).await.unwrap();

    assert_eq!(h.executor.recover_orphans().await.unwrap(), 1);

    let job = JobRepo::find_by_id(&h.pool, "j7").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(h.drain().is_empty());
}
