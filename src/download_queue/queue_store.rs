//! Durable job storage.
//!
//! Every state change is a single conditional UPDATE keyed on the current
//! status, so a transition that lost a race (for example a cancel landing
//! while the worker finishes) is reported as `false` instead of clobbering
//! the winner.

use super::models::*;
use super::schema::QUEUE_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::{open_in_memory, open_versioned};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Outcome of [`JobQueueStore::recover_stale_active`].
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub requeued: usize,
    /// Jobs that had no attempt left. They stay active so the caller can
    /// fail them through the regular path.
    pub exhausted: Vec<Job>,
}

const TERMINAL: &[JobStatus] = &[JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled];

/// `'a', 'b'` for an SQL `IN (...)` list.
fn status_list(statuses: &[JobStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Builds a guarded status change:
/// `UPDATE jobs SET status = <to>, <assignments> WHERE <filter> AND status IN (<from>)`.
///
/// Fails for a transition the job lifecycle does not allow.
fn transition_sql(from: &[JobStatus], to: JobStatus, assignments: &str, filter: &str) -> Result<String> {
    if let Some(bad) = from.iter().find(|f| !f.can_transition_to(to)) {
        anyhow::bail!("Invalid job transition {} -> {}", bad.as_str(), to.as_str());
    }
    let mut sql = format!("UPDATE jobs SET status = '{}'", to.as_str());
    if !assignments.is_empty() {
        sql.push_str(", ");
        sql.push_str(assignments);
    }
    sql.push_str(&format!(" WHERE {} AND status IN ({})", filter, status_list(from)));
    Ok(sql)
}

/// Trait for job queue storage operations.
pub trait JobQueueStore: Send + Sync {
    /// Inserts the job unless its id is already taken. Returns whether it was inserted.
    fn insert_if_absent(&self, job: &Job) -> Result<bool>;

    fn get(&self, id: &str) -> Result<Option<Job>>;

    /// Oldest waiting job whose `next_run_at` has passed.
    fn next_ready(&self, now: i64) -> Result<Option<Job>>;

    /// Earliest `next_run_at` among waiting jobs.
    fn next_wakeup(&self) -> Result<Option<i64>>;

    /// Atomically moves a waiting job to active and counts the attempt.
    fn claim(&self, id: &str) -> Result<bool>;

    /// Raises the stored progress of an active job. Lower values are ignored.
    fn update_progress(&self, id: &str, progress: u8) -> Result<bool>;

    fn mark_completed(&self, id: &str, result: &JobResult) -> Result<bool>;

    /// Puts an active job back to waiting until `next_run_at`.
    fn mark_retry(&self, id: &str, next_run_at: i64, error_message: &str) -> Result<bool>;

    fn mark_failed(&self, id: &str, error_message: &str) -> Result<bool>;

    /// Marks an active job as cancelled.
    fn mark_cancelled(&self, id: &str) -> Result<bool>;

    /// Deletes a job that has not started yet.
    fn remove_waiting(&self, id: &str) -> Result<bool>;

    /// Jobs owned by `user_id`, newest first.
    fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Job>>;

    /// Puts a failed or cancelled job back to waiting with a fresh attempt budget.
    fn reset_for_resubmit(&self, id: &str, payload: &JobPayload) -> Result<bool>;

    /// Handles jobs left active by a previous process: those with attempts
    /// left go back to waiting, the others are returned still active.
    fn recover_stale_active(&self) -> Result<RecoveryReport>;

    /// Deletes the oldest finished jobs beyond `keep`.
    fn prune_finished(&self, keep: usize) -> Result<usize>;
}

/// SQLite-backed job queue store.
pub struct SqliteJobQueueStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobQueueStore {
    /// Opens an existing queue database or creates a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path, QUEUE_VERSIONED_SCHEMAS, "queue")?;
        Ok(SqliteJobQueueStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory(QUEUE_VERSIONED_SCHEMAS)?;
        Ok(SqliteJobQueueStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let payload_json: String = row.get("payload")?;
        let payload: JobPayload = serde_json::from_str(&payload_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let result: Option<JobResult> = row
            .get::<_, Option<String>>("result")?
            .and_then(|s| serde_json::from_str(&s).ok());
        let status: String = row.get("status")?;
        let kind: String = row.get("kind")?;
        Ok(Job {
            id: row.get("id")?,
            kind: JobKind::from_str(&kind).unwrap_or_else(|| payload.kind()),
            user_id: row.get("user_id")?,
            payload,
            status: JobStatus::from_str(&status).unwrap_or(JobStatus::Failed),
            progress: row.get::<_, i64>("progress")?.clamp(0, 100) as u8,
            attempts: row.get::<_, i64>("attempts")?.max(0) as u32,
            max_attempts: row.get::<_, i64>("max_attempts")?.max(1) as u32,
            label: row.get("label")?,
            result,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            next_run_at: row.get("next_run_at")?,
        })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl JobQueueStore for SqliteJobQueueStore {
    fn insert_if_absent(&self, job: &Job) -> Result<bool> {
        let payload = serde_json::to_string(&job.payload).context("Cannot encode job payload")?;
        let result = job
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Cannot encode job result")?;
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            r#"INSERT OR IGNORE INTO jobs (
                id, kind, user_id, payload, status, progress, attempts, max_attempts,
                label, result, error_message, created_at, started_at, finished_at, next_run_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"#,
            params![
                job.id,
                job.kind.as_str(),
                job.user_id,
                payload,
                job.status.as_str(),
                job.progress as i64,
                job.attempts as i64,
                job.max_attempts as i64,
                job.label,
                result,
                job.error_message,
                job.created_at,
                job.started_at,
                job.finished_at,
                job.next_run_at,
            ],
        )?;
        Ok(inserted == 1)
    }

    fn get(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row("SELECT * FROM jobs WHERE id = ?1", [id], Self::row_to_job)
            .optional()?;
        Ok(job)
    }

    fn next_ready(&self, now: i64) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!(
                    "SELECT * FROM jobs
                     WHERE status = '{}' AND next_run_at <= ?1
                     ORDER BY next_run_at ASC, created_at ASC, rowid ASC
                     LIMIT 1",
                    JobStatus::Waiting.as_str()
                ),
                [now],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn next_wakeup(&self) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let next: Option<i64> = conn.query_row(
            &format!(
                "SELECT MIN(next_run_at) FROM jobs WHERE status = '{}'",
                JobStatus::Waiting.as_str()
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    fn claim(&self, id: &str) -> Result<bool> {
        let sql = transition_sql(
            &[JobStatus::Waiting],
            JobStatus::Active,
            "attempts = attempts + 1, started_at = ?2",
            "id = ?1",
        )?;
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(&sql, params![id, Self::now()])?;
        Ok(updated == 1)
    }

    fn update_progress(&self, id: &str, progress: u8) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            &format!(
                "UPDATE jobs SET progress = ?2
                 WHERE id = ?1 AND status = '{}' AND progress < ?2",
                JobStatus::Active.as_str()
            ),
            params![id, progress.min(100) as i64],
        )?;
        Ok(updated == 1)
    }

    fn mark_completed(&self, id: &str, result: &JobResult) -> Result<bool> {
        let result = serde_json::to_string(result).context("Cannot encode job result")?;
        let sql = transition_sql(
            &[JobStatus::Active],
            JobStatus::Completed,
            "progress = 100, result = ?2, error_message = NULL, finished_at = ?3",
            "id = ?1",
        )?;
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(&sql, params![id, result, Self::now()])?;
        Ok(updated == 1)
    }

    fn mark_retry(&self, id: &str, next_run_at: i64, error_message: &str) -> Result<bool> {
        let sql = transition_sql(
            &[JobStatus::Active],
            JobStatus::Waiting,
            "next_run_at = ?2, error_message = ?3",
            "id = ?1",
        )?;
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(&sql, params![id, next_run_at, error_message])?;
        Ok(updated == 1)
    }

    fn mark_failed(&self, id: &str, error_message: &str) -> Result<bool> {
        let sql = transition_sql(
            &[JobStatus::Active],
            JobStatus::Failed,
            "error_message = ?2, finished_at = ?3",
            "id = ?1",
        )?;
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(&sql, params![id, error_message, Self::now()])?;
        Ok(updated == 1)
    }

    fn mark_cancelled(&self, id: &str) -> Result<bool> {
        let sql = transition_sql(
            &[JobStatus::Active],
            JobStatus::Cancelled,
            "error_message = 'Cancelled by user', finished_at = ?2",
            "id = ?1",
        )?;
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(&sql, params![id, Self::now()])?;
        Ok(updated == 1)
    }

    fn remove_waiting(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            &format!(
                "DELETE FROM jobs WHERE id = ?1 AND status = '{}'",
                JobStatus::Waiting.as_str()
            ),
            [id],
        )?;
        Ok(deleted == 1)
    }

    fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT * FROM jobs
               WHERE user_id = ?1
               ORDER BY created_at DESC, rowid DESC
               LIMIT ?2"#,
        )?;
        let jobs = stmt
            .query_map(params![user_id, limit as i64], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn reset_for_resubmit(&self, id: &str, payload: &JobPayload) -> Result<bool> {
        let payload = serde_json::to_string(payload).context("Cannot encode job payload")?;
        let sql = transition_sql(
            &[JobStatus::Failed, JobStatus::Cancelled],
            JobStatus::Waiting,
            "payload = ?2, progress = 0, attempts = 0, result = NULL, error_message = NULL, \
             started_at = NULL, finished_at = NULL, next_run_at = ?3",
            "id = ?1",
        )?;
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(&sql, params![id, payload, Self::now()])?;
        Ok(updated == 1)
    }

    fn recover_stale_active(&self) -> Result<RecoveryReport> {
        let requeue = transition_sql(
            &[JobStatus::Active],
            JobStatus::Waiting,
            "next_run_at = ?1",
            "attempts < max_attempts",
        )?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let requeued = tx.execute(&requeue, [Self::now()])?;
        let exhausted = {
            let mut stmt = tx.prepare(&format!(
                "SELECT * FROM jobs WHERE status = '{}' ORDER BY rowid ASC",
                JobStatus::Active.as_str()
            ))?;
            let jobs = stmt
                .query_map([], Self::row_to_job)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            jobs
        };
        tx.commit()?;
        if requeued > 0 || !exhausted.is_empty() {
            info!(
                "Found interrupted jobs: {} requeued, {} out of attempts",
                requeued,
                exhausted.len()
            );
        }
        Ok(RecoveryReport { requeued, exhausted })
    }

    fn prune_finished(&self, keep: usize) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            &format!(
                "DELETE FROM jobs WHERE id IN (
                     SELECT id FROM jobs
                     WHERE status IN ({})
                     ORDER BY finished_at DESC, rowid DESC
                     LIMIT -1 OFFSET ?1
                 )",
                status_list(TERMINAL)
            ),
            [keep as i64],
        )?;
        Ok(deleted)
    }
}
