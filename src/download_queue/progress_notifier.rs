//! Progress reporting for a running job.
//!
//! Bridges the executors with the [`ProgressBroadcaster`] and the queue store.
//! Progress values only ever go up (retries included), and nothing is
//! published once the job's cancellation token fired.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::progress::{ProgressBroadcaster, ProgressEvent};

use super::models::Job;
use super::queue_store::JobQueueStore;

struct ReporterInner {
    broadcaster: Arc<ProgressBroadcaster>,
    store: Arc<dyn JobQueueStore>,
    job_id: String,
    user_id: String,
    label: String,
    bulk: bool,
    last_progress: AtomicU8,
    cancel: CancellationToken,
}

/// Cheap to clone; clones share the same progress high-water mark.
#[derive(Clone)]
pub struct JobReporter {
    inner: Arc<ReporterInner>,
}

impl JobReporter {
    pub fn new(
        broadcaster: Arc<ProgressBroadcaster>,
        store: Arc<dyn JobQueueStore>,
        job: &Job,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                broadcaster,
                store,
                job_id: job.id.clone(),
                user_id: job.user_id.clone(),
                label: job.label.clone(),
                bulk: job.is_bulk(),
                last_progress: AtomicU8::new(job.progress.min(100)),
                cancel,
            }),
        }
    }

    pub fn current(&self) -> u8 {
        self.inner.last_progress.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    fn publish(&self, event: ProgressEvent) {
        if self.is_cancelled() {
            debug!("Job {} cancelled, dropping {} event", self.inner.job_id, event.event_type.as_str());
            return;
        }
        self.inner.broadcaster.publish(&self.inner.user_id, &event);
    }

    /// Raises the job progress. Values at or below the current one are ignored.
    pub fn progress(&self, progress: u8) {
        let progress = progress.min(100);
        let previous = self.inner.last_progress.fetch_max(progress, Ordering::SeqCst);
        if progress <= previous {
            return;
        }
        if let Err(e) = self.inner.store.update_progress(&self.inner.job_id, progress) {
            warn!("Cannot persist progress of job {}: {}", self.inner.job_id, e);
        }
        self.publish(ProgressEvent::progress(
            &self.inner.job_id,
            &self.inner.label,
            progress,
            self.inner.bulk,
        ));
    }

    /// Maps `percent` (0-100) of a stage onto the `start..=end` job range.
    pub fn scaled(&self, start: u8, end: u8, percent: f32) {
        let percent = percent.clamp(0.0, 100.0);
        let span = end.saturating_sub(start) as f32;
        let value = start as f32 + span * percent / 100.0;
        self.progress(value.floor() as u8);
    }

    /// Human readable status line, e.g. the current stage.
    pub fn info(&self, message: &str) {
        self.publish(ProgressEvent::info(
            &self.inner.job_id,
            message,
            self.current(),
            self.inner.bulk,
        ));
    }

    /// A single item of a bulk job failed; the job itself carries on.
    pub fn item_failed(&self, item_label: &str, message: &str) {
        self.publish(ProgressEvent::error(
            &self.inner.job_id,
            item_label,
            self.current(),
            message,
            self.inner.bulk,
        ));
    }

    pub fn completed(&self) {
        self.progress(100);
        self.publish(ProgressEvent::complete(
            &self.inner.job_id,
            &self.inner.label,
            self.inner.bulk,
        ));
    }

    pub fn failed(&self, message: &str) {
        self.publish(ProgressEvent::error(
            &self.inner.job_id,
            &self.inner.label,
            self.current(),
            message,
            self.inner.bulk,
        ));
    }
}
