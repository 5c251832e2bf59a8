//! Status events and their wire envelope.

use std::collections::BTreeMap;

use chrono::Utc;
use docpipe_core::job_events::{
    MSG_TYPE_ERROR, MSG_TYPE_JOB_COMPLETED, MSG_TYPE_STATUS_UPDATE, STATUS_COMPLETED,
    STATUS_FAILED, STATUS_PROCESSING,
};
use docpipe_core::types::{JobId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// What happened to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Progress,
    Completed,
    Failed,
}

impl StatusKind {
    /// `type` field of the wire envelope.
    pub fn message_type(self) -> &'static str {
        match self {
            Self::Progress => MSG_TYPE_STATUS_UPDATE,
            Self::Completed => MSG_TYPE_JOB_COMPLETED,
            Self::Failed => MSG_TYPE_ERROR,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Progress)
    }
}

/// A single status event for a job. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub job_id: JobId,
    pub kind: StatusKind,
    pub payload: serde_json::Value,
    pub timestamp: Timestamp,
}

impl StatusEvent {
    pub fn progress(job_id: &str, percent: u8, step: &str, message: &str) -> Self {
        let timestamp = Utc::now();
        Self {
            job_id: job_id.to_string(),
            kind: StatusKind::Progress,
            payload: json!({
                "jobId": job_id,
                "status": STATUS_PROCESSING,
                "progress": percent,
                "currentStep": step,
                "message": message,
                "timestamp": timestamp,
            }),
            timestamp,
        }
    }

    /// `download_urls` maps each output's name (without extension) to its
    /// retrieval reference.
    pub fn completed(
        job_id: &str,
        message: &str,
        download_urls: &BTreeMap<String, String>,
    ) -> Self {
        let timestamp = Utc::now();
        Self {
            job_id: job_id.to_string(),
            kind: StatusKind::Completed,
            payload: json!({
                "jobId": job_id,
                "status": STATUS_COMPLETED,
                "message": message,
                "downloadUrls": download_urls,
                "timestamp": timestamp,
            }),
            timestamp,
        }
    }

    pub fn failed(job_id: &str, error: &str) -> Self {
        let timestamp = Utc::now();
        Self {
            job_id: job_id.to_string(),
            kind: StatusKind::Failed,
            payload: json!({
                "jobId": job_id,
                "status": STATUS_FAILED,
                "error": error,
                "timestamp": timestamp,
            }),
            timestamp,
        }
    }

    /// Wrap the event in its wire envelope.
    pub fn to_message(&self) -> StatusMessage {
        StatusMessage {
            message_type: self.kind.message_type().to_string(),
            job_id: self.job_id.clone(),
            data: self.payload.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// `{type, jobId, data, timestamp}` envelope sent as one text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub job_id: JobId,
    pub data: serde_json::Value,
    pub timestamp: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_envelope_shape() {
        let msg = StatusEvent::progress("j1", 40, "parsing", "parsing").to_message();
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "status_update");
        assert_eq!(value["jobId"], "j1");
        assert_eq!(value["data"]["status"], "processing");
        assert_eq!(value["data"]["progress"], 40);
        assert_eq!(value["data"]["currentStep"], "parsing");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn completed_envelope_carries_download_urls() {
        let urls = BTreeMap::from([(
            "report".to_string(),
            "/api/v1/jobs/j1/files/report.xlsx".to_string(),
        )]);
        let msg = StatusEvent::completed("j1", "Processing complete", &urls).to_message();
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "job_completed");
        assert_eq!(value["data"]["status"], "completed");
        assert_eq!(
            value["data"]["downloadUrls"]["report"],
            "/api/v1/jobs/j1/files/report.xlsx"
        );
    }

    #[test]
    fn failure_envelope_uses_error_type() {
        let event = StatusEvent::failed("j1", "exit code 2");
        assert!(event.kind.is_terminal());

        let value = serde_json::to_value(event.to_message()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["status"], "failed");
        assert_eq!(value["data"]["error"], "exit code 2");
    }
}
