pub mod coordinator;
pub mod progress;
pub mod retry;

pub use coordinator::{SessionCoordinator, SessionOutcome};
pub use retry::{RetryDecision, RetryPolicy};

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::constants::CHARS_PER_WORD;
use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Incremental response, rendered chunk by chunk
    Streaming,
    /// Single JSON response
    Standard,
}

impl StreamMode {
    pub fn is_streaming(&self) -> bool {
        matches!(self, StreamMode::Streaming)
    }
}

/// Summary stored on the assistant turn a session produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingStats {
    pub request_id: String,
    pub chunk_count: u64,
    pub total_characters: u64,
    pub response_time_ms: u64,
    pub words_per_second: f64,
    pub attempts: u32,
    pub mode: StreamMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Started,
    Streaming,
    Completed,
    TimedOut,
    NetworkError,
    ServerError,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed
                | SessionState::TimedOut
                | SessionState::NetworkError
                | SessionState::ServerError
                | SessionState::Cancelled
        )
    }

    /// Terminal state a failed session lands in.
    pub fn for_error(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Timeout => SessionState::TimedOut,
            ErrorKind::Network => SessionState::NetworkError,
            ErrorKind::Cancelled => SessionState::Cancelled,
            ErrorKind::ServerError
            | ErrorKind::Validation
            | ErrorKind::ServiceUnavailable
            | ErrorKind::Unknown
            | ErrorKind::SessionActive => SessionState::ServerError,
        }
    }

    fn can_transition_to(&self, next: SessionState) -> bool {
        match (self, next) {
            (SessionState::Idle, SessionState::Started) => true,
            (SessionState::Started, SessionState::Streaming) => true,
            (SessionState::Started | SessionState::Streaming, next) => next.is_terminal(),
            _ => false,
        }
    }
}

/// One outstanding chat request.
#[derive(Debug, Clone)]
pub struct StreamingSession {
    pub request_id: String,
    pub start_time: Instant,
    pub chunk_count: u64,
    pub total_characters: u64,
    pub last_chunk_time: Option<Instant>,
    state: SessionState,
    text: String,
}

impl StreamingSession {
    pub fn new(request_id: String, start_time: Instant) -> Self {
        Self {
            request_id,
            start_time,
            chunk_count: 0,
            total_characters: 0,
            last_chunk_time: None,
            state: SessionState::Idle,
            text: String::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Moves the state machine forward. Terminal states are final; an invalid
    /// move is ignored and reported as `false`.
    pub fn transition(&mut self, next: SessionState) -> bool {
        if self.state == next && next == SessionState::Streaming {
            return true;
        }
        if !self.state.can_transition_to(next) {
            log::debug!(
                "session {} ignoring transition {:?} -> {:?}",
                self.request_id,
                self.state,
                next
            );
            return false;
        }
        self.state = next;
        true
    }

    /// Appends a chunk and returns the gap since the previous one. The first
    /// chunk has no gap; its wait is part of the response time only.
    pub fn record_chunk(&mut self, text: &str, now: Instant) -> Option<Duration> {
        let latency = self
            .last_chunk_time
            .map(|previous| now.saturating_duration_since(previous));
        self.chunk_count += 1;
        self.total_characters += text.chars().count() as u64;
        self.last_chunk_time = Some(now);
        self.text.push_str(text);
        self.transition(SessionState::Streaming);
        latency
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start_time)
    }

    pub fn words_per_second(&self, now: Instant) -> f64 {
        let elapsed_secs = self.elapsed(now).as_secs_f64();
        if elapsed_secs <= 0.0 {
            return 0.0;
        }
        (self.total_characters as f64 / CHARS_PER_WORD) / elapsed_secs
    }

    pub fn stats(&self, now: Instant, mode: StreamMode) -> StreamingStats {
        StreamingStats {
            request_id: self.request_id.clone(),
            chunk_count: self.chunk_count,
            total_characters: self.total_characters,
            response_time_ms: self.elapsed(now).as_millis() as u64,
            words_per_second: self.words_per_second(now),
            attempts: 1,
            mode,
        }
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_latency_is_measured_from_previous_chunk() {
        let start = Instant::now();
        let mut session = StreamingSession::new("r".to_string(), start);
        session.transition(SessionState::Started);

        assert_eq!(session.record_chunk("ab", start + Duration::from_millis(40)), None);
        assert_eq!(
            session.record_chunk("cde", start + Duration::from_millis(140)),
            Some(Duration::from_millis(100))
        );
        assert_eq!(session.last_chunk_time, Some(start + Duration::from_millis(140)));
        assert_eq!(session.chunk_count, 2);
        assert_eq!(session.total_characters, 5);
        assert_eq!(session.text(), "abcde");
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[test]
    fn words_per_second_uses_five_chars_per_word() {
        let start = Instant::now();
        let mut session = StreamingSession::new("r".to_string(), start);
        session.transition(SessionState::Started);
        session.record_chunk(&"x".repeat(100), start + Duration::from_millis(10));
        // 100 chars = 20 words over 2s
        let wps = session.words_per_second(start + Duration::from_secs(2));
        assert!((wps - 10.0).abs() < 1e-9);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut session = StreamingSession::new("r".to_string(), Instant::now());
        assert!(!session.transition(SessionState::Completed));
        assert!(session.transition(SessionState::Started));
        assert!(session.transition(SessionState::TimedOut));
        assert!(!session.transition(SessionState::Completed));
        assert!(!session.transition(SessionState::Cancelled));
        assert_eq!(session.state(), SessionState::TimedOut);
    }

    #[test]
    fn error_kinds_map_to_terminal_states() {
        assert_eq!(SessionState::for_error(ErrorKind::Timeout), SessionState::TimedOut);
        assert_eq!(SessionState::for_error(ErrorKind::Network), SessionState::NetworkError);
        assert_eq!(SessionState::for_error(ErrorKind::Validation), SessionState::ServerError);
        assert!(SessionState::for_error(ErrorKind::Cancelled).is_terminal());
    }

    #[test]
    fn stats_serialize_in_camel_case() {
        let start = Instant::now();
        let session = StreamingSession::new("abc".to_string(), start);
        let json = serde_json::to_value(session.stats(start, StreamMode::Standard)).unwrap();
        assert_eq!(json["requestId"], "abc");
        assert_eq!(json["mode"], "standard");
        assert_eq!(json["wordsPerSecond"], 0.0);
    }
}
