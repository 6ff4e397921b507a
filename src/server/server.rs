use anyhow::Result;
use std::time::Duration;

use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::events_route::events_routes;
use super::file_routes::{job_file_routes, song_routes};
use super::job_routes::job_routes;
use super::{log_requests, state::ServerState};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: &'static str,
    pub running_jobs: usize,
    pub live_streams: usize,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: env!("CARGO_PKG_VERSION"),
        running_jobs: state.job_queue.running_count(),
        live_streams: state.broadcaster.tracked_users(),
    };
    Json(stats)
}

pub fn make_app(state: ServerState) -> Router {
    let jobs: Router<ServerState> = job_routes().merge(job_file_routes());

    Router::new()
        .route("/", get(home))
        .nest("/v1/jobs", jobs)
        .nest("/v1/songs", song_routes())
        .nest("/v1/events", events_routes())
        // route_layer so the middleware sees the matched route template.
        .route_layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

/// Serves the API until `shutdown` fires. Open live streams are closed when
/// the listener stops.
pub async fn run_server(state: ServerState, shutdown: CancellationToken) -> Result<()> {
    let port = state.config.port;
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
