//! Job queue front end: submission, lookup and cancellation.
//!
//! Submissions return immediately with a job id; the [`JobWorker`] drains the
//! durable store one job at a time.
//!
//! [`JobWorker`]: super::JobWorker

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::catalog::CatalogStore;
use crate::progress::{ProgressBroadcaster, ProgressEvent};
use crate::server::metrics;

use super::folders::sanitize_folder_name;
use super::models::*;
use super::queue_store::JobQueueStore;

const MAX_JOB_ID_LEN: usize = 128;
pub const MAX_BULK_SONGS: usize = 500;

/// A submission request.
#[derive(Debug, Clone)]
pub enum JobRequest {
    Single {
        song_id: String,
        playlist: Option<String>,
    },
    Bulk {
        song_ids: Vec<String>,
        /// Caller chosen id that makes the submission idempotent.
        job_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub job_id: String,
    /// False when an existing job with the same id was returned instead.
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job had not started and was removed from the queue.
    Removed,
    /// The job was running; its cancellation token fired.
    Signalled,
}

/// Validates a caller supplied job id.
pub fn validate_job_id(id: &str) -> Result<(), JobQueueError> {
    if id.is_empty() || id.len() > MAX_JOB_ID_LEN {
        return Err(JobQueueError::InvalidId(format!(
            "must be 1 to {} characters",
            MAX_JOB_ID_LEN
        )));
    }
    if id.starts_with('.') {
        return Err(JobQueueError::InvalidId("must not start with '.'".into()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(JobQueueError::InvalidId(format!(
            "'{}' contains characters other than letters, digits, '-', '_' and '.'",
            id
        )));
    }
    Ok(())
}

pub struct JobQueue {
    store: Arc<dyn JobQueueStore>,
    catalog: Arc<dyn CatalogStore>,
    broadcaster: Arc<ProgressBroadcaster>,
    max_attempts: u32,
    work_available: Notify,
    /// Cancellation tokens of jobs the worker is executing.
    running: Mutex<HashMap<String, CancellationToken>>,
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn JobQueueStore>,
        catalog: Arc<dyn CatalogStore>,
        broadcaster: Arc<ProgressBroadcaster>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            catalog,
            broadcaster,
            max_attempts: max_attempts.max(1),
            work_available: Notify::new(),
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobQueueStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.broadcaster
    }

    pub fn submit(&self, user_id: &str, request: JobRequest) -> Result<SubmittedJob, JobQueueError> {
        match request {
            JobRequest::Single { song_id, playlist } => {
                self.submit_single(user_id, &song_id, playlist.as_deref())
            }
            JobRequest::Bulk { song_ids, job_id } => {
                self.submit_bulk(user_id, song_ids, job_id.as_deref())
            }
        }
    }

    pub fn submit_single(
        &self,
        user_id: &str,
        song_id: &str,
        playlist: Option<&str>,
    ) -> Result<SubmittedJob, JobQueueError> {
        let song = self
            .catalog
            .get_song_by_id(song_id)?
            .ok_or_else(|| JobQueueError::NotFound(format!("Song {}", song_id)))?;
        if song.user_id != user_id {
            return Err(JobQueueError::Forbidden(format!("Song {}", song_id)));
        }

        let payload = JobPayload::Single {
            song_id: song_id.to_string(),
            folder: playlist.and_then(sanitize_folder_name),
        };
        let job_id = uuid::Uuid::new_v4().to_string();
        let job = Job::new(&job_id, user_id, payload, &song.display_label(), self.max_attempts);
        self.store.insert_if_absent(&job)?;
        self.announce(&job);
        Ok(SubmittedJob {
            job_id,
            created: true,
        })
    }

    pub fn submit_bulk(
        &self,
        user_id: &str,
        song_ids: Vec<String>,
        job_id: Option<&str>,
    ) -> Result<SubmittedJob, JobQueueError> {
        if let Some(id) = job_id {
            validate_job_id(id)?;
        }

        let mut unique = Vec::with_capacity(song_ids.len());
        for id in song_ids {
            let id = id.trim().to_string();
            if !id.is_empty() && !unique.contains(&id) {
                unique.push(id);
            }
        }
        if unique.is_empty() {
            return Err(JobQueueError::InvalidRequest("No songs requested".into()));
        }
        if unique.len() > MAX_BULK_SONGS {
            return Err(JobQueueError::InvalidRequest(format!(
                "At most {} songs per bulk job",
                MAX_BULK_SONGS
            )));
        }

        let songs = self.catalog.get_songs_by_ids(&unique)?;
        if let Some(foreign) = songs.iter().find(|s| s.user_id != user_id) {
            return Err(JobQueueError::Forbidden(format!("Song {}", foreign.id)));
        }
        if let Some(missing) = unique.iter().find(|id| !songs.iter().any(|s| &s.id == *id)) {
            return Err(JobQueueError::NotFound(format!("Song {}", missing)));
        }

        let payload = JobPayload::Bulk { song_ids: unique };
        let label = format!("Bulk download ({} songs)", songs.len());

        let Some(job_id) = job_id else {
            let job_id = uuid::Uuid::new_v4().to_string();
            let job = Job::new(&job_id, user_id, payload, &label, self.max_attempts);
            self.store.insert_if_absent(&job)?;
            self.announce(&job);
            return Ok(SubmittedJob {
                job_id,
                created: true,
            });
        };

        let job = Job::new(job_id, user_id, payload.clone(), &label, self.max_attempts);
        if self.store.insert_if_absent(&job)? {
            self.announce(&job);
            return Ok(SubmittedJob {
                job_id: job_id.to_string(),
                created: true,
            });
        }

        let existing = self
            .store
            .get(job_id)?
            .ok_or_else(|| JobQueueError::Storage(format!("Job {} vanished during submit", job_id)))?;
        if existing.user_id != user_id {
            return Err(JobQueueError::IdConflict(job_id.to_string()));
        }
        match existing.status {
            JobStatus::Waiting | JobStatus::Active | JobStatus::Completed => {
                debug!(
                    "Bulk job {} already {}, not scheduling again",
                    job_id,
                    existing.status.as_str()
                );
                Ok(SubmittedJob {
                    job_id: job_id.to_string(),
                    created: false,
                })
            }
            JobStatus::Failed | JobStatus::Cancelled => {
                if !self.store.reset_for_resubmit(job_id, &payload)? {
                    // Someone else resubmitted it in between.
                    return Ok(SubmittedJob {
                        job_id: job_id.to_string(),
                        created: false,
                    });
                }
                info!("Resubmitted bulk job {} for user {}", job_id, user_id);
                let refreshed = self.store.get(job_id)?.unwrap_or(job);
                self.announce(&refreshed);
                Ok(SubmittedJob {
                    job_id: job_id.to_string(),
                    created: true,
                })
            }
        }
    }

    fn announce(&self, job: &Job) {
        info!(
            "Queued {} job {} for user {}: {}",
            job.kind.as_str(),
            job.id,
            job.user_id,
            job.label
        );
        metrics::record_job_submitted(job.kind.as_str());
        self.broadcaster.publish(
            &job.user_id,
            &ProgressEvent::queued(&job.id, &job.label, job.is_bulk()),
        );
        self.notify_work();
    }

    /// Returns the job if it exists and belongs to `user_id`.
    pub fn get_job(&self, user_id: &str, job_id: &str) -> Result<Job, JobQueueError> {
        let job = self
            .store
            .get(job_id)?
            .ok_or_else(|| JobQueueError::NotFound(format!("Job {}", job_id)))?;
        if job.user_id != user_id {
            return Err(JobQueueError::Forbidden(format!("Job {}", job_id)));
        }
        Ok(job)
    }

    pub fn list_jobs(&self, user_id: &str, limit: usize) -> Result<Vec<Job>, JobQueueError> {
        Ok(self.store.list_by_user(user_id, limit)?)
    }

    /// Cancels a job owned by `user_id`.
    ///
    /// Waiting jobs are removed. Active jobs are marked cancelled and their
    /// token fires, which kills the running tool; whatever the execution
    /// produces afterwards is discarded.
    pub fn cancel(&self, user_id: &str, job_id: &str) -> Result<CancelOutcome, JobQueueError> {
        let job = self.get_job(user_id, job_id)?;
        if job.status.is_terminal() {
            return Err(JobQueueError::NotCancellable(job_id.to_string()));
        }

        let outcome = if job.status == JobStatus::Waiting && self.store.remove_waiting(job_id)? {
            CancelOutcome::Removed
        } else if self.store.mark_cancelled(job_id)? {
            if let Some(token) = self.running.lock().unwrap().get(job_id) {
                token.cancel();
            }
            CancelOutcome::Signalled
        } else {
            return Err(JobQueueError::NotCancellable(job_id.to_string()));
        };

        info!("Job {} cancelled by user {} ({:?})", job_id, user_id, outcome);
        metrics::record_job_finished(job.kind.as_str(), JobStatus::Cancelled.as_str());
        self.broadcaster.publish(
            user_id,
            &ProgressEvent::user_cancelled(job_id, &job.label, job.is_bulk()),
        );
        Ok(outcome)
    }

    pub fn notify_work(&self) {
        self.work_available.notify_one();
    }

    /// Waits until new work is submitted or `timeout` passes.
    pub async fn wait_for_work(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.work_available.notified()).await;
    }

    /// Registers the token the worker hands to a job execution.
    pub(crate) fn register_running(&self, job_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.running
            .lock()
            .unwrap()
            .insert(job_id.to_string(), token.clone());
        token
    }

    pub(crate) fn finish_running(&self, job_id: &str) {
        self.running.lock().unwrap().remove(job_id);
    }

    /// Number of jobs currently executing; at most one with a single worker.
    pub fn running_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }
}
