//! Live progress updates over Server-Sent Events.
//!
//! One stream is tracked per user; opening a new connection closes the
//! previous one. Events carry the job transition as JSON with the event type
//! as SSE event name. Keep-alive comments stop idle proxies from dropping the
//! connection.

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::progress::{ProgressEvent, SubscriberId};
use crate::server::session::Session;
use crate::server::state::{GuardedBroadcaster, ServerState};
use crate::server::ServerConfig;

/// Deregisters the stream from the broadcaster when the response body is
/// dropped, i.e. when the client goes away.
struct StreamRegistration {
    broadcaster: GuardedBroadcaster,
    user_id: String,
    id: SubscriberId,
}

impl Drop for StreamRegistration {
    fn drop(&mut self) {
        if self.broadcaster.unregister_stream(&self.user_id, self.id) {
            info!("Live stream of user {} disconnected", self.user_id);
        }
    }
}

fn to_sse_event(event: &ProgressEvent) -> Option<Event> {
    match Event::default()
        .event(event.event_type.as_str())
        .json_data(event)
    {
        Ok(sse) => Some(sse),
        Err(e) => {
            warn!("Cannot serialize {} event: {}", event.event_type.as_str(), e);
            None
        }
    }
}

fn event_stream(
    receiver: mpsc::Receiver<ProgressEvent>,
    registration: StreamRegistration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(
        (receiver, registration),
        |(mut receiver, registration)| async move {
            loop {
                // None: the stream was replaced by a newer connection.
                let event = receiver.recv().await?;
                if let Some(sse) = to_sse_event(&event) {
                    return Some((Ok(sse), (receiver, registration)));
                }
            }
        },
    )
}

pub fn open_stream(
    broadcaster: &GuardedBroadcaster,
    user_id: &str,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let (id, receiver) = broadcaster.register_stream(user_id);
    info!("Live stream of user {} connected", user_id);
    let registration = StreamRegistration {
        broadcaster: broadcaster.clone(),
        user_id: user_id.to_string(),
        id,
    };
    event_stream(receiver, registration)
}

/// GET /v1/events
async fn events(
    session: Session,
    State(broadcaster): State<GuardedBroadcaster>,
    State(config): State<ServerConfig>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("Opening live stream for user {}", session.user_id);
    Sse::new(open_stream(&broadcaster, &session.user_id))
        .keep_alive(KeepAlive::new().interval(config.keepalive).text("keep-alive"))
}

pub fn events_routes() -> Router<ServerState> {
    Router::new().route("/", get(events))
}
