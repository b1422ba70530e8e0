use std::ops::ControlFlow;
use std::sync::Mutex;
use std::time::Instant;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::check_cancelled;
use crate::constants::{LOG_PREFIX_ERROR, LOG_PREFIX_SUCCESS};
use crate::error::{ErrorKind, SessionError};
use crate::events::{EventBus, SessionEvent};
use crate::http::error::map_reqwest_error;
use crate::http::{CancellableRequest, ChatRequest, handle_json_response};
use crate::logging::{log_request_io, log_timed, sanitize_log_message};
use crate::monitor::{MetricKind, ResponseSpeed, SharedMonitor};
use crate::render::RenderSurface;
use crate::session::progress::ProgressTicker;
use crate::session::{SessionState, StreamMode, StreamingSession, StreamingStats};
use crate::streaming::{DecodedLine, EventDecoder, StreamEvent, extract_response_text};

/// Text and stats of a session that completed.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub text: String,
    pub stats: StreamingStats,
}

struct ActiveSession {
    request_id: String,
    token: CancellationToken,
}

/// Owns the single in-flight session and everything that observes it.
pub struct SessionCoordinator {
    client: reqwest::Client,
    chat_url: String,
    monitor: SharedMonitor,
    bus: EventBus,
    active: Mutex<Option<ActiveSession>>,
}

/// Frees the active slot when a run ends, however it ends.
struct ActiveSlot<'a> {
    coordinator: &'a SessionCoordinator,
    request_id: String,
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        let mut active = self.coordinator.active_slot();
        if active
            .as_ref()
            .is_some_and(|session| session.request_id == self.request_id)
        {
            *active = None;
        }
    }
}

impl SessionCoordinator {
    pub fn new(
        client: reqwest::Client,
        chat_url: String,
        monitor: SharedMonitor,
        bus: EventBus,
    ) -> Self {
        Self {
            client,
            chat_url,
            monitor,
            bus,
            active: Mutex::new(None),
        }
    }

    pub fn monitor(&self) -> &SharedMonitor {
        &self.monitor
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn is_active(&self) -> bool {
        self.active_slot().is_some()
    }

    /// Cancels the in-flight session. Returns `false` when there is none,
    /// so cancelling after completion does nothing.
    pub fn cancel_active(&self) -> bool {
        match self.active_slot().as_ref() {
            Some(session) => {
                log::info!("cancelling session {}", session.request_id);
                session.token.cancel();
                true
            }
            None => false,
        }
    }

    fn active_slot(&self) -> std::sync::MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn acquire(
        &self,
        request_id: &str,
        token: CancellationToken,
    ) -> Result<ActiveSlot<'_>, SessionError> {
        let mut active = self.active_slot();
        if let Some(current) = active.as_ref() {
            log::warn!(
                "rejecting new session while {} is in flight",
                current.request_id
            );
            return Err(SessionError::session_active());
        }
        *active = Some(ActiveSession {
            request_id: request_id.to_string(),
            token,
        });
        Ok(ActiveSlot {
            coordinator: self,
            request_id: request_id.to_string(),
        })
    }

    /// Runs one attempt end to end: adaptive deadline, progress messages,
    /// incremental rendering and metric bookkeeping. The caller finishes the
    /// surface once it knows the attempt count.
    pub async fn run(
        &self,
        request: &ChatRequest,
        mode: StreamMode,
        surface: &mut dyn RenderSurface,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        let request_id = Uuid::new_v4().to_string();
        let token = cancel.child_token();
        let _slot = self.acquire(&request_id, token.clone())?;

        let (timeout, level) = {
            let mut monitor = self.monitor.lock();
            let timeout = monitor.next_timeout();
            monitor.recorder.record_request();
            (timeout, monitor.profile.level)
        };

        let mut session = StreamingSession::new(request_id.clone(), Instant::now());
        session.transition(SessionState::Started);
        log::info!(
            "session {} started | {:?} | {} messages | timeout {}s",
            request_id,
            mode,
            request.message_count(),
            timeout.as_secs()
        );
        self.bus.publish(SessionEvent::Started {
            request_id: request_id.clone(),
            mode,
            timeout_ms: timeout.as_millis() as u64,
        });
        surface.set_typing(true);

        let progress = ProgressTicker::spawn(
            self.bus.clone(),
            request_id.clone(),
            level,
            token.child_token(),
        );

        let result = {
            let attempt = self.drive(&mut session, request, mode, &mut *surface, &progress, &token);
            tokio::pin!(attempt);

            tokio::select! {
                biased;
                _ = token.cancelled() => Err(SessionError::request_cancelled()),
                _ = tokio::time::sleep(timeout) => {
                    log::warn!("session {} exceeded {}s, aborting", request_id, timeout.as_secs());
                    Err(SessionError::timeout())
                }
                result = &mut attempt => result,
            }
        };

        progress.stop();
        surface.set_typing(false);

        match result {
            Ok(()) => Ok(self.complete(session, mode)),
            Err(error) => Err(self.fail(&mut session, error)),
        }
    }

    /// Single non-incremental request under the same deadline and slot guard.
    pub async fn run_standard(
        &self,
        request: &ChatRequest,
        surface: &mut dyn RenderSurface,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        self.run(request, StreamMode::Standard, surface, cancel).await
    }

    async fn drive(
        &self,
        session: &mut StreamingSession,
        request: &ChatRequest,
        mode: StreamMode,
        surface: &mut dyn RenderSurface,
        progress: &ProgressTicker,
        token: &CancellationToken,
    ) -> Result<(), SessionError> {
        let body = request.body(mode);
        log_request_io(&self.chat_url, Some(&body), None, mode.is_streaming());

        let response = CancellableRequest::new(&self.client, token.clone())
            .post_json(&self.chat_url, &body, mode.is_streaming())
            .await?;

        match mode {
            StreamMode::Streaming => {
                self.consume_stream(session, response, surface, progress, token)
                    .await
            }
            StreamMode::Standard => {
                let value = handle_json_response(response, token).await?;
                log_request_io(&self.chat_url, None, Some(&value), false);

                let text = extract_response_text(&value).ok_or_else(|| {
                    SessionError::unknown("backend response did not contain any text")
                })?;
                progress.stop();
                session.record_chunk(&text, Instant::now());
                self.bus.publish(SessionEvent::Chunk {
                    request_id: session.request_id.clone(),
                    index: session.chunk_count,
                    text: text.clone(),
                });
                surface.append_text(&text);
                Ok(())
            }
        }
    }

    async fn consume_stream(
        &self,
        session: &mut StreamingSession,
        response: reqwest::Response,
        surface: &mut dyn RenderSurface,
        progress: &ProgressTicker,
        token: &CancellationToken,
    ) -> Result<(), SessionError> {
        let mut stream = response.bytes_stream();
        let mut decoder = EventDecoder::default();

        loop {
            check_cancelled!(token);

            match stream.next().await {
                Some(Ok(bytes)) => {
                    let lines = decoder.feed(&bytes);
                    if let ControlFlow::Break(result) =
                        self.apply_lines(session, lines, surface, progress)
                    {
                        return result;
                    }
                }
                Some(Err(e)) => {
                    log::warn!("session {} stream broke: {}", session.request_id, e);
                    return Err(map_reqwest_error(e));
                }
                None => {
                    let lines = decoder.finish();
                    if let ControlFlow::Break(result) =
                        self.apply_lines(session, lines, surface, progress)
                    {
                        return result;
                    }
                    if session.chunk_count == 0 {
                        return Err(SessionError::network(
                            "connection closed before any response arrived",
                        ));
                    }
                    log::warn!(
                        "session {} stream ended without a done marker",
                        session.request_id
                    );
                    return Ok(());
                }
            }
        }
    }

    fn apply_lines(
        &self,
        session: &mut StreamingSession,
        lines: Vec<DecodedLine>,
        surface: &mut dyn RenderSurface,
        progress: &ProgressTicker,
    ) -> ControlFlow<Result<(), SessionError>> {
        for line in lines {
            match line {
                DecodedLine::Event(StreamEvent::Content(text)) => {
                    progress.stop();
                    self.observe_chunk(session, &text, Instant::now());
                    surface.append_text(&text);
                }
                DecodedLine::Event(StreamEvent::Done) => return ControlFlow::Break(Ok(())),
                DecodedLine::Event(StreamEvent::Error(message)) => {
                    return ControlFlow::Break(Err(SessionError::server_error(&message)));
                }
                DecodedLine::Event(StreamEvent::Empty) => {}
                DecodedLine::Malformed(reason) => {
                    log::warn!(
                        "session {} skipped malformed event: {}",
                        session.request_id,
                        sanitize_log_message(&reason)
                    );
                }
            }
        }
        ControlFlow::Continue(())
    }

    /// Accounts for one chunk arriving at `now`: chunk event, plus a latency
    /// sample and a slow-chunk notice once there is a previous chunk to
    /// measure the gap from. Returns the gap, if any.
    pub fn observe_chunk(
        &self,
        session: &mut StreamingSession,
        text: &str,
        now: Instant,
    ) -> Option<u64> {
        let latency_ms = session
            .record_chunk(text, now)
            .map(|gap| gap.as_millis() as u64);

        self.bus.publish(SessionEvent::Chunk {
            request_id: session.request_id.clone(),
            index: session.chunk_count,
            text: text.to_string(),
        });

        let latency_ms = latency_ms?;
        let threshold_ms = {
            let mut monitor = self.monitor.lock();
            monitor
                .recorder
                .record(MetricKind::ChunkLatency, latency_ms as f64);
            monitor.thresholds.max_chunk_latency_ms
        };

        if latency_ms as f64 > threshold_ms {
            log::warn!(
                "session {} chunk {} took {}ms (limit {:.0}ms)",
                session.request_id,
                session.chunk_count,
                latency_ms,
                threshold_ms
            );
            self.bus.publish(SessionEvent::SlowChunk {
                request_id: session.request_id.clone(),
                latency_ms,
                threshold_ms: threshold_ms.round() as u64,
            });
        }
        Some(latency_ms)
    }

    fn complete(&self, mut session: StreamingSession, mode: StreamMode) -> SessionOutcome {
        session.transition(SessionState::Completed);
        let stats = session.stats(Instant::now(), mode);

        let (speed, min_words_per_second) = {
            let mut monitor = self.monitor.lock();
            monitor
                .recorder
                .record(MetricKind::ResponseTime, stats.response_time_ms as f64);
            monitor
                .recorder
                .record(MetricKind::WordsPerSecond, stats.words_per_second);
            monitor.recorder.record_success();
            (
                monitor.classify_response(stats.response_time_ms as f64),
                monitor.thresholds.min_words_per_second,
            )
        };

        if speed != ResponseSpeed::Normal {
            log::warn!(
                "session {} response was {:?} ({}ms)",
                session.request_id,
                speed,
                stats.response_time_ms
            );
            self.bus.publish(SessionEvent::SlowResponse {
                request_id: session.request_id.clone(),
                response_time_ms: stats.response_time_ms,
                speed,
            });
        }
        if stats.chunk_count > 0 && stats.words_per_second < min_words_per_second {
            log::warn!(
                "session {} throughput {:.2} words/s is below {:.2}",
                session.request_id,
                stats.words_per_second,
                min_words_per_second
            );
        }

        log_timed(
            LOG_PREFIX_SUCCESS,
            &format!(
                "session {} completed | {} chunks | {} chars",
                session.request_id, stats.chunk_count, stats.total_characters
            ),
            session.start_time,
        );

        let request_id = session.request_id.clone();
        let text = session.into_text();
        self.bus.publish(SessionEvent::Completed {
            request_id,
            text: text.clone(),
            stats: stats.clone(),
        });

        SessionOutcome { text, stats }
    }

    fn fail(&self, session: &mut StreamingSession, error: SessionError) -> SessionError {
        session.transition(SessionState::for_error(error.kind()));

        {
            let mut monitor = self.monitor.lock();
            match error.kind() {
                ErrorKind::Timeout => monitor.recorder.record_timeout(),
                ErrorKind::Network => monitor.recorder.record_connection_failure(),
                _ => {}
            }
        }

        if error.is_cancelled() {
            log::info!("session {} cancelled", session.request_id);
        } else {
            log_timed(
                LOG_PREFIX_ERROR,
                &format!("session {} failed: {}", session.request_id, error),
                session.start_time,
            );
        }

        self.bus.publish(SessionEvent::Error {
            request_id: session.request_id.clone(),
            kind: error.kind(),
            message: error.user_message(),
            recovery: error.recovery_actions(),
        });
        error
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::monitor::{CapabilityLevel, PerformanceMonitor};

    fn coordinator() -> SessionCoordinator {
        let monitor = PerformanceMonitor::new(CapabilityLevel::High.starter_profile());
        SessionCoordinator::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/api/chat".to_string(),
            SharedMonitor::new(monitor),
            EventBus::new(),
        )
    }

    fn slow_notices(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<u64> {
        let mut slow = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::SlowChunk { latency_ms, .. } = event {
                slow.push(latency_ms);
            }
        }
        slow
    }

    fn chunk_samples(coordinator: &SessionCoordinator) -> usize {
        coordinator
            .monitor()
            .snapshot()
            .recorder
            .samples(MetricKind::ChunkLatency)
            .len()
    }

    fn feed(coordinator: &SessionCoordinator, start: Instant, offsets: &[u64]) -> Vec<Option<u64>> {
        let mut session = StreamingSession::new("r1".to_string(), start);
        session.transition(SessionState::Started);
        offsets
            .iter()
            .map(|offset| {
                coordinator.observe_chunk(
                    &mut session,
                    "word ",
                    start + Duration::from_millis(*offset),
                )
            })
            .collect()
    }

    #[test]
    fn slow_gap_raises_exactly_one_notice() {
        let coordinator = coordinator();
        let mut rx = coordinator.bus().subscribe();

        let latencies = feed(&coordinator, Instant::now(), &[0, 100, 2600]);
        assert_eq!(latencies, vec![None, Some(100), Some(2500)]);
        assert_eq!(slow_notices(&mut rx), vec![2500]);
        assert_eq!(chunk_samples(&coordinator), 2);
    }

    #[test]
    fn wait_for_first_chunk_is_not_a_chunk_gap() {
        let coordinator = coordinator();
        let mut rx = coordinator.bus().subscribe();

        let latencies = feed(&coordinator, Instant::now(), &[3000, 3100, 5600]);
        assert_eq!(latencies, vec![None, Some(100), Some(2500)]);
        assert_eq!(slow_notices(&mut rx), vec![2500]);
        assert_eq!(chunk_samples(&coordinator), 2);
        assert_eq!(
            coordinator.monitor().snapshot().recorder.averages().avg_chunk_latency,
            1300.0
        );
    }

    #[test]
    fn cancel_without_a_session_is_a_no_op() {
        let coordinator = coordinator();
        assert!(!coordinator.is_active());
        assert!(!coordinator.cancel_active());
    }

    #[test]
    fn slot_is_exclusive_until_released() {
        let coordinator = coordinator();
        let slot = coordinator
            .acquire("first", CancellationToken::new())
            .unwrap();
        let err = coordinator
            .acquire("second", CancellationToken::new())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::SessionActive);

        drop(slot);
        assert!(!coordinator.is_active());
        assert!(coordinator.acquire("third", CancellationToken::new()).is_ok());
    }
}
