//! Job HTTP routes.
//!
//! Provides endpoints for:
//! - Submitting single and bulk download jobs
//! - Listing the caller's recent jobs (snapshot to recover missed events)
//! - Job status and cancellation

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::download_queue::{CancelOutcome, Job, JobRequest, SubmittedJob};
use crate::server::errors::ApiError;
use crate::server::session::Session;
use crate::server::state::{GuardedJobQueue, ServerState};
use crate::server::ServerConfig;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SingleJobBody {
    pub song_id: String,
    /// Playlist the song is downloaded for; becomes the target folder.
    #[serde(default)]
    pub playlist: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkJobBody {
    pub song_ids: Vec<String>,
    /// Caller chosen id; resubmitting it does not schedule the work twice.
    #[serde(default)]
    pub job_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<Job>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    /// "removed" when the job had not started, "signalled" when it was running.
    pub outcome: &'static str,
}

fn submitted(job: SubmittedJob) -> impl IntoResponse {
    let status = if job.created {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(SubmitResponse {
            job_id: job.job_id,
            created: job.created,
        }),
    )
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /single - Queue a single song download
async fn submit_single(
    session: Session,
    State(queue): State<GuardedJobQueue>,
    Json(body): Json<SingleJobBody>,
) -> Result<impl IntoResponse, ApiError> {
    debug!("User {} requesting song {}", session.user_id, body.song_id);
    let job = queue.submit(
        &session.user_id,
        JobRequest::Single {
            song_id: body.song_id,
            playlist: body.playlist,
        },
    )?;
    Ok(submitted(job))
}

/// POST /bulk - Queue a bulk download producing an archive
async fn submit_bulk(
    session: Session,
    State(queue): State<GuardedJobQueue>,
    Json(body): Json<BulkJobBody>,
) -> Result<impl IntoResponse, ApiError> {
    debug!(
        "User {} requesting {} songs (job id {:?})",
        session.user_id,
        body.song_ids.len(),
        body.job_id
    );
    let job = queue.submit(
        &session.user_id,
        JobRequest::Bulk {
            song_ids: body.song_ids,
            job_id: body.job_id,
        },
    )?;
    Ok(submitted(job))
}

/// GET / - The caller's recent jobs, newest first
async fn list_jobs(
    session: Session,
    State(queue): State<GuardedJobQueue>,
    State(config): State<ServerConfig>,
    Query(query): Query<ListQuery>,
) -> Result<Json<JobsResponse>, ApiError> {
    let limit = query.limit.clamp(1, config.max_jobs_listed);
    let jobs = queue.list_jobs(&session.user_id, limit)?;
    Ok(Json(JobsResponse { jobs }))
}

/// GET /{id} - Status, progress and result of one job
async fn get_job(
    session: Session,
    State(queue): State<GuardedJobQueue>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(queue.get_job(&session.user_id, &id)?))
}

/// DELETE /{id} - Cancel a waiting or running job
async fn cancel_job(
    session: Session,
    State(queue): State<GuardedJobQueue>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let outcome = queue.cancel(&session.user_id, &id)?;
    Ok(Json(CancelResponse {
        job_id: id,
        outcome: match outcome {
            CancelOutcome::Removed => "removed",
            CancelOutcome::Signalled => "signalled",
        },
    }))
}

pub fn job_routes() -> Router<ServerState> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/single", post(submit_single))
        .route("/bulk", post(submit_bulk))
        .route("/{id}", get(get_job).delete(cancel_job))
}
