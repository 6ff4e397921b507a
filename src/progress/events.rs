use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressEventType {
    Queued,
    Progress,
    Info,
    Complete,
    Error,
    UserCancelled,
}

impl ProgressEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressEventType::Queued => "queued",
            ProgressEventType::Progress => "progress",
            ProgressEventType::Info => "info",
            ProgressEventType::Complete => "complete",
            ProgressEventType::Error => "error",
            ProgressEventType::UserCancelled => "usercancelled",
        }
    }
}

/// Ephemeral job transition message pushed to live subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: ProgressEventType,
    pub job_id: String,
    pub label: String,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub bulk: bool,
}

impl ProgressEvent {
    fn new(event_type: ProgressEventType, job_id: &str, label: &str, progress: u8, bulk: bool) -> Self {
        Self {
            event_type,
            job_id: job_id.to_string(),
            label: label.to_string(),
            progress: progress.min(100),
            error: None,
            bulk,
        }
    }

    pub fn queued(job_id: &str, label: &str, bulk: bool) -> Self {
        Self::new(ProgressEventType::Queued, job_id, label, 0, bulk)
    }

    pub fn progress(job_id: &str, label: &str, progress: u8, bulk: bool) -> Self {
        Self::new(ProgressEventType::Progress, job_id, label, progress, bulk)
    }

    pub fn info(job_id: &str, label: &str, progress: u8, bulk: bool) -> Self {
        Self::new(ProgressEventType::Info, job_id, label, progress, bulk)
    }

    pub fn complete(job_id: &str, label: &str, bulk: bool) -> Self {
        Self::new(ProgressEventType::Complete, job_id, label, 100, bulk)
    }

    pub fn error(job_id: &str, label: &str, progress: u8, error: &str, bulk: bool) -> Self {
        let mut event = Self::new(ProgressEventType::Error, job_id, label, progress, bulk);
        event.error = Some(error.to_string());
        event
    }

    pub fn user_cancelled(job_id: &str, label: &str, bulk: bool) -> Self {
        Self::new(ProgressEventType::UserCancelled, job_id, label, 0, bulk)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event_type,
            ProgressEventType::Complete | ProgressEventType::Error | ProgressEventType::UserCancelled
        )
    }
}
