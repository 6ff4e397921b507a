//! Per-user fan-out of progress events.
//!
//! Two independent subscriber kinds are tracked per user: a set of callback
//! handlers and at most one live stream (the SSE connection). Delivery is
//! fire-and-forget; events published while nobody listens are dropped.
//!
//! Publishing never awaits, so it can be called from tool output callbacks
//! and from the blocking archive writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::events::ProgressEvent;
use crate::server::metrics;

pub type EventHandler = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct StreamEntry {
    id: SubscriberId,
    sender: mpsc::Sender<ProgressEvent>,
}

pub struct ProgressBroadcaster {
    next_id: AtomicU64,
    /// user_id -> (subscriber id -> handler)
    handlers: RwLock<HashMap<String, HashMap<SubscriberId, EventHandler>>>,
    /// user_id -> the single tracked live stream
    streams: RwLock<HashMap<String, StreamEntry>>,
    stream_buffer: usize,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ProgressBroadcaster {
    pub fn new(stream_buffer: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(HashMap::new()),
            streams: RwLock::new(HashMap::new()),
            stream_buffer: stream_buffer.max(1),
        }
    }

    fn next_subscriber_id(&self) -> SubscriberId {
        SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn subscribe(&self, user_id: &str, handler: EventHandler) -> SubscriberId {
        let id = self.next_subscriber_id();
        let mut handlers = self.handlers.write().unwrap();
        handlers
            .entry(user_id.to_string())
            .or_default()
            .insert(id, handler);
        id
    }

    /// Removes a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, user_id: &str, id: SubscriberId) -> bool {
        let mut handlers = self.handlers.write().unwrap();
        let Some(user_handlers) = handlers.get_mut(user_id) else {
            return false;
        };
        let removed = user_handlers.remove(&id).is_some();
        if user_handlers.is_empty() {
            handlers.remove(user_id);
        }
        removed
    }

    /// Registers the live stream for a user, replacing any previous one.
    ///
    /// The replaced stream's receiver sees its channel close.
    pub fn register_stream(&self, user_id: &str) -> (SubscriberId, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let id = self.next_subscriber_id();
        let mut streams = self.streams.write().unwrap();
        if streams
            .insert(user_id.to_string(), StreamEntry { id, sender: tx })
            .is_some()
        {
            debug!("Replaced live stream for user {}", user_id);
        }
        metrics::set_live_streams(streams.len());
        (id, rx)
    }

    /// Deregisters a stream, but only if it is still the tracked one.
    pub fn unregister_stream(&self, user_id: &str, id: SubscriberId) -> bool {
        let mut streams = self.streams.write().unwrap();
        let is_current = streams.get(user_id).map(|e| e.id == id).unwrap_or(false);
        if is_current {
            streams.remove(user_id);
            metrics::set_live_streams(streams.len());
        }
        is_current
    }

    /// Delivers an event to every subscriber of `user_id`.
    ///
    /// Returns the number of subscribers reached.
    pub fn publish(&self, user_id: &str, event: &ProgressEvent) -> usize {
        // Handlers run outside the lock so they may (un)subscribe.
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .unwrap()
            .get(user_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default();
        let mut delivered = handlers.len();
        for handler in handlers {
            handler(event);
        }

        let stale_stream = {
            let streams = self.streams.read().unwrap();
            match streams.get(user_id) {
                None => None,
                Some(entry) => match entry.sender.try_send(event.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        None
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(
                            "Live stream for user {} is full, dropping {} event for job {}",
                            user_id,
                            event.event_type.as_str(),
                            event.job_id
                        );
                        None
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => Some(entry.id),
                },
            }
        };
        if let Some(id) = stale_stream {
            debug!("Live stream for user {} is closed, removing", user_id);
            self.unregister_stream(user_id, id);
        }

        delivered
    }

    pub fn handler_count(&self, user_id: &str) -> usize {
        self.handlers
            .read()
            .unwrap()
            .get(user_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    pub fn has_stream(&self, user_id: &str) -> bool {
        self.streams.read().unwrap().contains_key(user_id)
    }

    pub fn tracked_users(&self) -> usize {
        self.handlers.read().unwrap().len()
    }
}
