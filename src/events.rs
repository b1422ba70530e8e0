use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::{ErrorKind, RecoveryAction};
use crate::monitor::ResponseSpeed;
use crate::session::{StreamMode, StreamingStats};

const EVENT_BUS_CAPACITY: usize = 256;

/// Lifecycle notifications published by the session coordinator
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Request issued
    Started {
        request_id: String,
        mode: StreamMode,
        timeout_ms: u64,
    },

    /// Waiting message while no chunk has arrived yet
    Progress {
        request_id: String,
        elapsed_secs: u64,
        message: String,
    },

    /// Incremental fragment of the response
    Chunk {
        request_id: String,
        index: u64,
        text: String,
    },

    /// Gap between chunks exceeded the threshold (informational)
    SlowChunk {
        request_id: String,
        latency_ms: u64,
        threshold_ms: u64,
    },

    /// Completed response was slower than expected
    SlowResponse {
        request_id: String,
        response_time_ms: u64,
        speed: ResponseSpeed,
    },

    /// Response finished
    Completed {
        request_id: String,
        text: String,
        stats: StreamingStats,
    },

    /// Attempt failed
    Error {
        request_id: String,
        kind: ErrorKind,
        message: String,
        recovery: Vec<RecoveryAction>,
    },

    /// Another streaming attempt will follow after the delay
    Retrying {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
    },

    /// Switching to a single non-incremental request
    FallingBack { reason: ErrorKind },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Started { .. } => "started",
            SessionEvent::Progress { .. } => "progress",
            SessionEvent::Chunk { .. } => "chunk",
            SessionEvent::SlowChunk { .. } => "slow_chunk",
            SessionEvent::SlowResponse { .. } => "slow_response",
            SessionEvent::Completed { .. } => "completed",
            SessionEvent::Error { .. } => "error",
            SessionEvent::Retrying { .. } => "retrying",
            SessionEvent::FallingBack { .. } => "falling_back",
        }
    }
}

/// Typed publish/subscribe channel for session notifications.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: SessionEvent) {
        log::trace!("event: {}", event.name());
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_type() {
        let event = SessionEvent::SlowChunk {
            request_id: "r1".to_string(),
            latency_ms: 2500,
            threshold_ms: 2000,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "slow_chunk");
        assert_eq!(json["latency_ms"], 2500);
    }

    #[test]
    fn error_event_carries_kind_and_actions() {
        let event = SessionEvent::Error {
            request_id: "r1".to_string(),
            kind: ErrorKind::ServiceUnavailable,
            message: "down".to_string(),
            recovery: vec![RecoveryAction::Wait],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "service_unavailable");
        assert_eq!(json["recovery"][0], "wait");
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(SessionEvent::FallingBack {
            reason: ErrorKind::Timeout,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "falling_back");
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        EventBus::new().publish(SessionEvent::Retrying {
            attempt: 1,
            max_attempts: 3,
            delay_ms: 2000,
        });
    }
}
