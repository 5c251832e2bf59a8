//! Job lifecycle states and the typed submission payload.
//!
//! A submission is validated into a [`NewJob`] before anything is written to
//! the store, so malformed payloads are rejected at the front door instead of
//! being discovered by a worker.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, UserId};

/// Longest accepted caller-supplied job id.
const MAX_JOB_ID_LEN: usize = 128;

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Lifecycle state of a job record.
///
/// `Queued -> Running -> {Completed, Failed}`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    /// Database / wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::Validation(format!("Unknown job state '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Argument payload of a job.
///
/// Either a plain argument list passed through verbatim, or a typed payload
/// for one of the known job kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobArgs {
    List(Vec<String>),
    Typed(TypedArgs),
}

impl Default for JobArgs {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

/// Payloads for the job kinds the pipeline knows how to launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypedArgs {
    /// Extract structured data from one or more documents.
    DocumentExtraction { documents: Vec<String> },
    /// Full property analysis: document extraction plus financial model
    /// population and report generation.
    PropertyAnalysis(PropertyAnalysisArgs),
}

/// Inputs of a property analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyAnalysisArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rent_roll: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t12: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offering_memo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    #[serde(default)]
    pub generate_pitch_deck: bool,
    #[serde(default)]
    pub include_analysis: bool,
}

impl PropertyAnalysisArgs {
    fn documents(&self) -> impl Iterator<Item = &String> {
        [&self.rent_roll, &self.t12, &self.offering_memo, &self.template]
            .into_iter()
            .flatten()
    }

    fn to_args(&self, job_id: &str, output_dir: &Path) -> Vec<String> {
        let mut args = Vec::new();
        let flags = [
            ("--rent-roll", &self.rent_roll),
            ("--t12", &self.t12),
            ("--om", &self.offering_memo),
            ("--template", &self.template),
            ("--property-id", &self.property_id),
        ];
        for (flag, value) in flags {
            if let Some(value) = value {
                args.push(flag.to_string());
                args.push(value.clone());
            }
        }
        if self.generate_pitch_deck {
            args.push("--generate-pitch-deck".to_string());
        }
        if self.include_analysis {
            args.push("--include-analysis".to_string());
        }
        args.push("--output-dir".to_string());
        args.push(output_dir.display().to_string());
        args.push("--job-id".to_string());
        args.push(job_id.to_string());
        args
    }
}

// ---------------------------------------------------------------------------
// Command spec
// ---------------------------------------------------------------------------

/// What to launch for a job: executable, working directory, arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    pub command: String,
    pub working_dir: String,
    pub args: JobArgs,
}

impl CommandSpec {
    /// Expand the payload into the concrete argument list for a launch.
    ///
    /// Typed payloads that need to know where to write their results get the
    /// job's output directory appended as flags; plain lists are passed
    /// through untouched.
    pub fn resolve_args(&self, job_id: &str, output_dir: &Path) -> Vec<String> {
        match &self.args {
            JobArgs::List(args) => args.clone(),
            JobArgs::Typed(TypedArgs::DocumentExtraction { documents }) => documents.clone(),
            JobArgs::Typed(TypedArgs::PropertyAnalysis(analysis)) => {
                analysis.to_args(job_id, output_dir)
            }
        }
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.command.trim().is_empty() {
            return Err(CoreError::Validation("command must not be empty".into()));
        }
        if self.working_dir.trim().is_empty() {
            return Err(CoreError::Validation("workingDir must not be empty".into()));
        }
        reject_nul("command", &self.command)?;
        reject_nul("workingDir", &self.working_dir)?;

        match &self.args {
            JobArgs::List(args) => {
                for arg in args {
                    reject_nul("args", arg)?;
                }
            }
            JobArgs::Typed(TypedArgs::DocumentExtraction { documents }) => {
                if documents.is_empty() {
                    return Err(CoreError::Validation(
                        "document_extraction requires at least one document".into(),
                    ));
                }
                for doc in documents {
                    if doc.trim().is_empty() {
                        return Err(CoreError::Validation(
                            "document paths must not be empty".into(),
                        ));
                    }
                    reject_nul("documents", doc)?;
                }
            }
            JobArgs::Typed(TypedArgs::PropertyAnalysis(analysis)) => {
                if analysis.documents().next().is_none() {
                    return Err(CoreError::Validation(
                        "property_analysis requires at least one of rentRoll, t12, offeringMemo, template"
                            .into(),
                    ));
                }
                for doc in analysis.documents() {
                    reject_nul("property_analysis", doc)?;
                }
                if let Some(property_id) = &analysis.property_id {
                    reject_nul("propertyId", property_id)?;
                }
            }
        }
        Ok(())
    }
}

fn reject_nul(field: &str, value: &str) -> Result<(), CoreError> {
    if value.contains('\0') {
        return Err(CoreError::Validation(format!(
            "{field} must not contain NUL bytes"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Raw job submission as received from a client.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmission {
    /// Optional caller-chosen id; a UUID is generated when absent.
    #[serde(default)]
    pub job_id: Option<JobId>,
    pub command: String,
    pub working_dir: String,
    #[serde(default)]
    pub args: JobArgs,
}

/// A validated submission, ready to be enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub id: JobId,
    pub user_id: UserId,
    pub spec: CommandSpec,
}

impl JobSubmission {
    /// Validate the submission for `user_id` and assign its job id.
    pub fn validate(self, user_id: &str) -> Result<NewJob, CoreError> {
        if user_id.trim().is_empty() {
            return Err(CoreError::Validation("userId must not be empty".into()));
        }

        let id = match self.job_id {
            Some(id) => {
                validate_job_id(&id)?;
                id
            }
            None => uuid::Uuid::new_v4().to_string(),
        };

        let spec = CommandSpec {
            command: self.command,
            working_dir: self.working_dir,
            args: self.args,
        };
        spec.validate()?;

        Ok(NewJob {
            id,
            user_id: user_id.to_string(),
            spec,
        })
    }
}

/// Job ids name the job's output directory, so they are restricted to a
/// filesystem-safe alphabet.
pub fn validate_job_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() || id.len() > MAX_JOB_ID_LEN {
        return Err(CoreError::Validation(format!(
            "jobId must be 1..={MAX_JOB_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CoreError::Validation(
            "jobId may only contain ASCII letters, digits, '-' and '_'".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
