//! Fan-out of job status events to the owning user's channels.

use std::collections::BTreeMap;
use std::sync::Arc;

use docpipe_db::{DbPool, JobRepo};

use crate::message::StatusEvent;
use crate::registry::{ConnectionRegistry, Frame};

/// Resolves a job's owner and pushes status events to every channel of that
/// user.
///
/// Holds no state of its own. Unknown jobs and store errors are logged and
/// the event is dropped; delivery never affects job state.
#[derive(Clone)]
pub struct StatusBroadcaster {
    pool: DbPool,
    registry: Arc<ConnectionRegistry>,
}

impl StatusBroadcaster {
    pub fn new(pool: DbPool, registry: Arc<ConnectionRegistry>) -> Self {
        Self { pool, registry }
    }

    /// Deliver `event` to the job owner's channels.
    ///
    /// Returns the number of channels reached.
    pub async fn broadcast(&self, event: StatusEvent) -> usize {
        let owner = match JobRepo::find_by_id(&self.pool, &event.job_id).await {
            Ok(Some(job)) => job.user_id,
            Ok(None) => {
                tracing::warn!(job_id = %event.job_id, "Status event for unknown job dropped");
                return 0;
            }
            Err(e) => {
                tracing::error!(
                    job_id = %event.job_id,
                    error = %e,
                    "Failed to resolve job owner, status event dropped",
                );
                return 0;
            }
        };

        let text = match serde_json::to_string(&event.to_message()) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(job_id = %event.job_id, error = %e, "Failed to encode status event");
                return 0;
            }
        };

        let delivered = self.registry.send_to_user(&owner, Frame::Text(text)).await;
        tracing::debug!(
            job_id = %event.job_id,
            user_id = %owner,
            kind = event.kind.message_type(),
            delivered,
            "Status event broadcast",
        );
        delivered
    }

    pub async fn progress(&self, job_id: &str, percent: u8, step: &str, message: &str) -> usize {
        self.broadcast(StatusEvent::progress(job_id, percent, step, message))
            .await
    }

    pub async fn completed(
        &self,
        job_id: &str,
        message: &str,
        download_urls: &BTreeMap<String, String>,
    ) -> usize {
        self.broadcast(StatusEvent::completed(job_id, message, download_urls))
            .await
    }

    pub async fn error(&self, job_id: &str, message: &str) -> usize {
        self.broadcast(StatusEvent::failed(job_id, message)).await
    }
}
