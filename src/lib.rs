//! TuneFetch Server Library
//!
//! Download job orchestration: a durable job queue with a single worker,
//! fuzzy file matching, archive building and live progress updates.

pub mod archive;
pub mod catalog;
pub mod config;
pub mod download_queue;
pub mod matcher;
pub mod progress;
pub mod server;
pub mod sqlite_persistence;
pub mod tools;

// Re-export commonly used types for convenience
pub use download_queue::{JobQueue, JobWorker};
pub use server::{run_server, RequestsLoggingLevel};
