//! Per-session progress broadcast, modeling the "bounded broadcast channel
//! the orchestrator writes to; subscribers read until the terminal event
//! closes the channel" redesign from the spec's Design Notes.
//!
//! Adapted from `weavegraph::event_bus::hub::EventHub`: same
//! broadcast-channel-plus-lag-tracking shape, but scoped to one session and
//! closed by the orchestrator itself once a terminal event is published,
//! rather than living for the process lifetime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventType {
    SessionStarted,
    PageFetched,
    PageFailed,
    PageEmbedded,
    SessionCompleted,
    SessionFailed,
}

impl SessionEventType {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionEventType::SessionCompleted | SessionEventType::SessionFailed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: SessionEventType,
    pub session_id: String,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(
        event_type: SessionEventType,
        session_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        SessionEvent {
            id: Uuid::new_v4(),
            event_type,
            session_id: session_id.into(),
            payload,
            at: Utc::now(),
        }
    }
}

const DEFAULT_CAPACITY: usize = 256;

pub struct SessionEventHub {
    sender: RwLock<Option<Sender<SessionEvent>>>,
    dropped: AtomicUsize,
}

impl SessionEventHub {
    pub fn new() -> Arc<Self> {
        let (sender, _) = broadcast::channel(DEFAULT_CAPACITY);
        Arc::new(SessionEventHub {
            sender: RwLock::new(Some(sender)),
            dropped: AtomicUsize::new(0),
        })
    }

    /// Publishes an event. Closes the hub automatically after a terminal
    /// event so subscribers see the channel end rather than hanging forever.
    pub fn publish(&self, event: SessionEvent) {
        let terminal = event.event_type.is_terminal();
        if let Some(sender) = self.sender.read().clone() {
            let _ = sender.send(event);
        }
        if terminal {
            self.close();
        }
    }

    pub fn subscribe(self: &Arc<Self>) -> SessionEventStream {
        let receiver = self
            .sender
            .read()
            .as_ref()
            .map(|s| s.subscribe())
            .unwrap_or_else(|| {
                let (sender, receiver) = broadcast::channel(1);
                drop(sender);
                receiver
            });
        SessionEventStream {
            receiver,
            hub: Arc::clone(self),
        }
    }

    pub fn close(&self) {
        let _ = self.sender.write().take();
    }

    fn record_lag(&self, missed: u64) {
        let total = self
            .dropped
            .fetch_add(missed as usize, Ordering::Relaxed)
            .saturating_add(missed as usize);
        warn!(missed, total_dropped = total, "session event stream lagged");
    }
}

pub struct SessionEventStream {
    receiver: Receiver<SessionEvent>,
    hub: Arc<SessionEventHub>,
}

impl SessionEventStream {
    /// Receives the next event, or `None` once the hub has closed (terminal
    /// state reached) and the buffer is drained.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    self.hub.record_lag(missed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Adapts this stream into a `futures_util::Stream`, for callers that
    /// want to `.map()`/`.filter()` events rather than loop on `recv`.
    pub fn into_async_stream(self) -> impl futures_util::Stream<Item = SessionEvent> {
        futures_util::stream::unfold(self, |mut stream| async move {
            stream.recv().await.map(|event| (event, stream))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_ends_after_terminal_event() {
        let hub = SessionEventHub::new();
        let mut stream = hub.subscribe();

        hub.publish(SessionEvent::new(
            SessionEventType::SessionStarted,
            "s1",
            serde_json::json!({}),
        ));
        hub.publish(SessionEvent::new(
            SessionEventType::SessionCompleted,
            "s1",
            serde_json::json!({}),
        ));

        let first = stream.recv().await.unwrap();
        assert_eq!(first.event_type, SessionEventType::SessionStarted);
        let second = stream.recv().await.unwrap();
        assert_eq!(second.event_type, SessionEventType::SessionCompleted);
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn async_stream_adapter_yields_until_terminal() {
        use futures_util::StreamExt;

        let hub = SessionEventHub::new();
        let stream = hub.subscribe();

        hub.publish(SessionEvent::new(
            SessionEventType::SessionStarted,
            "s2",
            serde_json::json!({}),
        ));
        hub.publish(SessionEvent::new(
            SessionEventType::SessionCompleted,
            "s2",
            serde_json::json!({}),
        ));

        let events: Vec<SessionEvent> = stream.into_async_stream().collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[1].event_type.is_terminal());
    }
}
