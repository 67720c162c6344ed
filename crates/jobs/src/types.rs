// crates/jobs/src/types.rs
//! Types for the background job tracker.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Caller-supplied bookkeeping attached to a job at creation.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Returned when a string is not a valid job id.
#[derive(Debug, Error)]
#[error("invalid job id: {0}")]
pub struct ParseJobIdError(String);

impl FromStr for JobId {
    type Err = ParseJobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ParseJobIdError(s.to_string()))
    }
}

/// Lifecycle status of a job.
///
/// `Pending -> Running -> {Completed, Failed}`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of failure ended a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// The task returned an error.
    TaskError,
    /// The task panicked.
    Panic,
}

/// Structured failure recorded on a `Failed` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    /// Top-level, human-readable message.
    pub message: String,
    /// Full cause chain and backtrace, when one was captured.
    pub trace: String,
    /// Always false today: nothing retries jobs.
    pub retryable: bool,
}

impl JobError {
    /// Build from a task error, keeping anyhow's cause chain.
    ///
    /// When anyhow did not capture a backtrace (`RUST_BACKTRACE` unset), one
    /// is forced at the point the failure is recorded.
    pub fn from_task_error(err: &anyhow::Error) -> Self {
        let trace = if err.backtrace().status() == BacktraceStatus::Captured {
            format!("{err:?}")
        } else {
            format!("{err:?}\n\nStack backtrace:\n{}", Backtrace::force_capture())
        };
        Self {
            kind: JobErrorKind::TaskError,
            message: err.to_string(),
            trace,
            retryable: false,
        }
    }

    /// Build from a panic payload. `site` is the panic location and stack,
    /// when the panic hook recorded one.
    pub fn panic(message: impl Into<String>, site: Option<String>) -> Self {
        let message = message.into();
        let trace = match site {
            Some(site) => format!("task {site}: {message}"),
            None => format!("task panicked: {message}"),
        };
        Self {
            kind: JobErrorKind::Panic,
            message,
            trace,
            retryable: false,
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// One tracked unit of work and its lifecycle state.
///
/// Owned by `JobRegistry`; everything outside the registry only ever sees
/// cloned snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(rename = "job_id")]
    pub id: JobId,
    pub job_type: String,
    pub status: JobStatus,
    pub metadata: Metadata,
    pub result: Option<serde_json::Value>,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: u8,
    pub progress_message: Option<String>,
}

impl JobRecord {
    pub(crate) fn new(id: JobId, job_type: String, metadata: Metadata) -> Self {
        Self {
            id,
            job_type,
            status: JobStatus::Pending,
            metadata,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0,
            progress_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Which mutation produced a `JobEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobEventKind {
    Created,
    Started,
    Progress,
    Completed,
    Failed,
    Evicted,
}

impl JobEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobEventKind::Created => "created",
            JobEventKind::Started => "started",
            JobEventKind::Progress => "progress",
            JobEventKind::Completed => "completed",
            JobEventKind::Failed => "failed",
            JobEventKind::Evicted => "evicted",
        }
    }
}

/// Snapshot broadcast after every applied registry mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job: JobRecord,
}

/// Filter for `JobRegistry::list`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub job_type: Option<String>,
    pub status: Option<JobStatus>,
}

impl JobFilter {
    pub fn matches(&self, record: &JobRecord) -> bool {
        self.job_type
            .as_deref()
            .map_or(true, |t| t == record.job_type)
            && self.status.map_or(true, |s| s == record.status)
    }
}
