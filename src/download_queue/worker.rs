//! Background worker draining the job queue.
//!
//! Jobs run one at a time, oldest first. Each execution gets its own
//! cancellation token registered with the [`JobQueue`], so a user cancel or
//! a shutdown kills the running tool. Whatever a cancelled execution returns
//! afterwards is discarded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::JobSettings;
use crate::server::metrics;

use super::bulk_job::run_bulk;
use super::context::JobContext;
use super::manager::JobQueue;
use super::models::*;
use super::progress_notifier::JobReporter;
use super::queue_store::RecoveryReport;
use super::retry_policy::RetryPolicy;
use super::single_job::run_single;

const MIN_IDLE_WAIT: Duration = Duration::from_millis(100);
const INTERRUPTED_MESSAGE: &str = "Interrupted by a restart";

pub struct JobWorker {
    queue: Arc<JobQueue>,
    context: JobContext,
    retry_policy: RetryPolicy,
    poll_interval: Duration,
    keep_finished_jobs: usize,
}

impl JobWorker {
    pub fn new(queue: Arc<JobQueue>, context: JobContext, settings: &JobSettings) -> Self {
        Self {
            queue,
            context,
            retry_policy: RetryPolicy::new(settings),
            poll_interval: Duration::from_secs(settings.poll_interval_secs.max(1)),
            keep_finished_jobs: settings.keep_finished_jobs,
        }
    }

    /// Main processing loop - call from a spawned task.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Job worker starting (max_attempts={}, poll_interval={}s)",
            self.retry_policy.max_attempts,
            self.poll_interval.as_secs()
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.run_next(&shutdown).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => error!("Job worker error: {}", e),
            }

            tokio::select! {
                _ = self.queue.wait_for_work(self.idle_wait()) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        info!("Job worker stopped");
    }

    /// Deals with jobs a previous process left active. Jobs with attempts
    /// left are queued again; the others fail like any job that ran out of
    /// attempts.
    pub async fn recover_interrupted(&self) -> Result<RecoveryReport, JobQueueError> {
        let report = self.queue.store().recover_stale_active()?;
        for job in &report.exhausted {
            warn!(
                "Job {} was interrupted on its last attempt ({}/{})",
                job.id, job.attempts, job.max_attempts
            );
            if let JobPayload::Single { song_id, .. } = &job.payload {
                if let Err(e) = self.context.catalog_sync.mark(song_id, false, false).await {
                    warn!("Cannot reset flags of song {}: {}", song_id, e);
                }
            }
            let reporter = JobReporter::new(
                self.queue.broadcaster().clone(),
                self.queue.store().clone(),
                job,
                CancellationToken::new(),
            );
            self.fail(job, &reporter, INTERRUPTED_MESSAGE, None);
        }
        if report.requeued > 0 {
            self.queue.notify_work();
        }
        Ok(report)
    }

    /// How long to sleep when nothing is ready: until the next retry is due,
    /// capped by the poll interval.
    fn idle_wait(&self) -> Duration {
        match self.queue.store().next_wakeup() {
            Ok(Some(at)) => {
                let secs = (at - chrono::Utc::now().timestamp()).max(0) as u64;
                Duration::from_secs(secs).clamp(MIN_IDLE_WAIT, self.poll_interval)
            }
            Ok(None) => self.poll_interval,
            Err(e) => {
                warn!("Cannot read next wakeup time: {}", e);
                self.poll_interval
            }
        }
    }

    /// Runs the oldest ready job to its end. Returns false when nothing was
    /// ready.
    pub async fn run_next(&self, shutdown: &CancellationToken) -> Result<bool, JobQueueError> {
        let store = self.queue.store().clone();
        let now = chrono::Utc::now().timestamp();
        let Some(candidate) = store.next_ready(now)? else {
            return Ok(false);
        };

        // Registered before the claim so a cancel landing right after it
        // always finds the token.
        let token = self.queue.register_running(&candidate.id);
        if !store.claim(&candidate.id)? {
            debug!("Job {} was taken or cancelled before it started", candidate.id);
            self.queue.finish_running(&candidate.id);
            return Ok(true);
        }
        let job = store.get(&candidate.id)?.unwrap_or(candidate);
        info!(
            "Starting {} job {} (attempt {}/{})",
            job.kind.as_str(),
            job.id,
            job.attempts,
            job.max_attempts
        );

        let reporter = JobReporter::new(
            self.queue.broadcaster().clone(),
            store.clone(),
            &job,
            token.clone(),
        );
        let ctx = self.context.for_job(token.clone());
        let started = Instant::now();

        let execution = self.execute(&ctx, &job, &reporter);
        tokio::pin!(execution);
        let result = tokio::select! {
            result = &mut execution => result,
            _ = shutdown.cancelled() => {
                info!("Shutting down, interrupting job {}", job.id);
                token.cancel();
                execution.await
            }
        };

        self.finalize(&job, &reporter, result, started.elapsed());
        self.queue.finish_running(&job.id);

        match store.prune_finished(self.keep_finished_jobs) {
            Ok(0) => {}
            Ok(n) => debug!("Pruned {} finished jobs", n),
            Err(e) => warn!("Cannot prune finished jobs: {}", e),
        }
        Ok(true)
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        job: &Job,
        reporter: &JobReporter,
    ) -> Result<JobResult, JobError> {
        match &job.payload {
            JobPayload::Single { song_id, folder } => {
                run_single(ctx, job, song_id, folder.as_deref(), reporter).await
            }
            JobPayload::Bulk { song_ids } => run_bulk(ctx, job, song_ids, reporter).await,
        }
    }

    fn finalize(
        &self,
        job: &Job,
        reporter: &JobReporter,
        result: Result<JobResult, JobError>,
        elapsed: Duration,
    ) {
        let store = self.queue.store();
        let kind = job.kind.as_str();

        if reporter.is_cancelled() {
            // Either the user cancelled (the row is already terminal) or we are
            // shutting down and the job is recovered on next start.
            info!("Job {} was interrupted, discarding its outcome", job.id);
            return;
        }

        match result {
            Ok(job_result) => match store.mark_completed(&job.id, &job_result) {
                Ok(true) => {
                    info!(
                        "Job {} completed in {:.1}s: {} ok, {} failed",
                        job.id,
                        elapsed.as_secs_f64(),
                        job_result.success_count,
                        job_result.fail_count
                    );
                    reporter.completed();
                    metrics::record_job_finished(kind, JobStatus::Completed.as_str());
                    metrics::observe_job_duration(kind, elapsed.as_secs_f64());
                }
                Ok(false) => info!("Job {} is no longer active, result discarded", job.id),
                Err(e) => error!("Cannot store result of job {}: {}", job.id, e),
            },
            Err(e) if e.error_type == JobErrorType::Cancelled => {
                debug!("Job {} stopped: {}", job.id, e);
            }
            Err(e) if self.retry_policy.should_retry(&e, job.attempts) => {
                let backoff = self.retry_policy.backoff_secs(job.attempts);
                warn!(
                    "Job {} failed (attempt {}/{}), retrying in {}s: {}",
                    job.id, job.attempts, job.max_attempts, backoff, e
                );
                match store.mark_retry(&job.id, self.retry_policy.next_run_at(job.attempts), &e.message) {
                    Ok(true) => {
                        reporter.info(&format!("Attempt {} failed, retrying", job.attempts));
                        metrics::record_job_retry(kind);
                    }
                    Ok(false) => info!("Job {} is no longer active, not retrying", job.id),
                    Err(store_err) => error!("Cannot reschedule job {}: {}", job.id, store_err),
                }
            }
            Err(e) => {
                error!(
                    "Job {} failed after {} attempts ({}): {}",
                    job.id,
                    job.attempts,
                    e.error_type.as_str(),
                    e
                );
                self.fail(job, reporter, &e.message, Some(elapsed));
            }
        }
    }

    /// Terminal failure: stores it, then sends the job's single error event.
    fn fail(&self, job: &Job, reporter: &JobReporter, message: &str, elapsed: Option<Duration>) {
        let kind = job.kind.as_str();
        match self.queue.store().mark_failed(&job.id, message) {
            Ok(true) => {
                reporter.failed(message);
                metrics::record_job_finished(kind, JobStatus::Failed.as_str());
                if let Some(elapsed) = elapsed {
                    metrics::observe_job_duration(kind, elapsed.as_secs_f64());
                }
            }
            Ok(false) => info!("Job {} is no longer active, failure discarded", job.id),
            Err(e) => error!("Cannot mark job {} failed: {}", job.id, e),
        }
    }
}
