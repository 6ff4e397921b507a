//! Download job queue
//!
//! Durable queue of single-song and bulk download jobs, drained by a single
//! background worker that drives the external tools, files the results and
//! reports progress to live subscribers.

mod bulk_job;
mod context;
mod folders;
mod manager;
mod models;
mod progress_notifier;
mod queue_store;
mod retry_policy;
mod schema;
mod single_job;
mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::JobContext;
pub use folders::{
    resolve_target_folder, sanitize_folder_name, user_dir_name, UserFolders, ARCHIVES_FOLDER,
    BULK_FOLDER, DEFAULT_FOLDER,
};
pub use manager::{validate_job_id, CancelOutcome, JobQueue, JobRequest, SubmittedJob, MAX_BULK_SONGS};
pub use models::*;
pub use progress_notifier::JobReporter;
pub use queue_store::{JobQueueStore, RecoveryReport, SqliteJobQueueStore};
pub use retry_policy::RetryPolicy;
pub use schema::QUEUE_VERSIONED_SCHEMAS;
pub use worker::JobWorker;
