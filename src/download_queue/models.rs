//! Data models for the download job queue.
//!
//! Defines jobs, their lifecycle status, payloads, results and errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::catalog::CatalogError;
use crate::tools::ToolError;

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Single,
    Bulk,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Single => "single",
            JobKind::Bulk => "bulk",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "single" => Some(JobKind::Single),
            "bulk" => Some(JobKind::Bulk),
            _ => None,
        }
    }
}

/// Lifecycle status of a job.
///
/// ```text
/// waiting -> active -> completed | failed
///    ^         |
///    +---------+  (retry after a retryable failure)
/// ```
/// `cancelled` can be reached from `waiting` or `active`. Failed and
/// cancelled jobs go back to `waiting` only through an explicit resubmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed, // terminal
    Failed,    // terminal
    Cancelled, // terminal
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Waiting, Active)
                | (Waiting, Cancelled)
                | (Active, Completed)
                | (Active, Failed)
                | (Active, Waiting)
                | (Active, Cancelled)
                | (Failed, Waiting)
                | (Cancelled, Waiting)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(JobStatus::Waiting),
            "active" => Some(JobStatus::Active),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

/// What a job has to download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobPayload {
    Single {
        song_id: String,
        /// Sanitized folder name requested by the client, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        folder: Option<String>,
    },
    Bulk { song_ids: Vec<String> },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Single { .. } => JobKind::Single,
            JobPayload::Bulk { .. } => JobKind::Bulk,
        }
    }

    pub fn song_ids(&self) -> Vec<String> {
        match self {
            JobPayload::Single { song_id, .. } => vec![song_id.clone()],
            JobPayload::Bulk { song_ids } => song_ids.clone(),
        }
    }
}

/// Outcome metadata stored on a completed job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Matched file (single) or archive (bulk), relative to the user's folder.
    pub file_name: String,
    /// Per-file names included in the result.
    #[serde(default)]
    pub files: Vec<String>,
    pub success_count: usize,
    pub fail_count: usize,
}

/// A unit of download work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub user_id: String,
    pub payload: JobPayload,
    pub status: JobStatus,
    /// 0-100, never decreases while the job lives.
    pub progress: u8,
    /// Executions started so far, the first one included.
    pub attempts: u32,
    pub max_attempts: u32,
    pub label: String,
    pub result: Option<JobResult>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    /// Earliest time a waiting job may be picked up.
    #[serde(skip)]
    pub next_run_at: i64,
}

impl Job {
    pub fn new(id: &str, user_id: &str, payload: JobPayload, label: &str, max_attempts: u32) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: id.to_string(),
            kind: payload.kind(),
            user_id: user_id.to_string(),
            payload,
            status: JobStatus::Waiting,
            progress: 0,
            attempts: 0,
            max_attempts,
            label: label.to_string(),
            result: None,
            error_message: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            next_run_at: now,
        }
    }

    pub fn is_bulk(&self) -> bool {
        self.kind == JobKind::Bulk
    }
}

/// Category of a job execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorType {
    NotFound,  // Song or source does not exist - NO retry
    Tool,      // External tool failed - retry
    NoOutput,  // Tool ran but nothing usable came out - retry
    Storage,   // Catalog or file system error - retry
    Archive,   // Archive could not be written - retry
    Cancelled, // User cancelled - NO retry
}

impl JobErrorType {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, JobErrorType::NotFound | JobErrorType::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobErrorType::NotFound => "not_found",
            JobErrorType::Tool => "tool",
            JobErrorType::NoOutput => "no_output",
            JobErrorType::Storage => "storage",
            JobErrorType::Archive => "archive",
            JobErrorType::Cancelled => "cancelled",
        }
    }
}

/// Error raised by a job execution.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct JobError {
    pub error_type: JobErrorType,
    pub message: String,
}

impl JobError {
    pub fn new(error_type: JobErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.error_type.is_retryable()
    }

    pub fn cancelled() -> Self {
        Self::new(JobErrorType::Cancelled, "Cancelled by user")
    }
}

impl From<ToolError> for JobError {
    fn from(e: ToolError) -> Self {
        let error_type = match &e {
            ToolError::Cancelled => JobErrorType::Cancelled,
            ToolError::NoOutput(_) | ToolError::InvalidOutput(_) => JobErrorType::NoOutput,
            ToolError::Unresolvable(_) => JobErrorType::NotFound,
            ToolError::Io(_) => JobErrorType::Storage,
            ToolError::Spawn { .. } | ToolError::Failed { .. } | ToolError::Timeout { .. } => {
                JobErrorType::Tool
            }
        };
        Self::new(error_type, e.to_string())
    }
}

impl From<CatalogError> for JobError {
    fn from(e: CatalogError) -> Self {
        let error_type = match &e {
            CatalogError::NotFound(_) => JobErrorType::NotFound,
            _ => JobErrorType::Storage,
        };
        Self::new(error_type, e.to_string())
    }
}

impl From<ArchiveError> for JobError {
    fn from(e: ArchiveError) -> Self {
        Self::new(JobErrorType::Archive, e.to_string())
    }
}

impl From<std::io::Error> for JobError {
    fn from(e: std::io::Error) -> Self {
        Self::new(JobErrorType::Storage, e.to_string())
    }
}

/// Errors returned to callers of the queue API.
#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid job id: {0}")]
    InvalidId(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Job id already in use: {0}")]
    IdConflict(String),

    #[error("Job {0} can no longer be cancelled")]
    NotCancellable(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for JobQueueError {
    fn from(e: anyhow::Error) -> Self {
        JobQueueError::Storage(format!("{:#}", e))
    }
}

impl From<CatalogError> for JobQueueError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound(what) => JobQueueError::NotFound(what),
            other => JobQueueError::Storage(other.to_string()),
        }
    }
}
