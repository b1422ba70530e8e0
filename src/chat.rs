use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::constants::ERROR_EMPTY_MESSAGE;
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::http::ChatRequest;
use crate::render::RenderSurface;
use crate::session::{RetryDecision, RetryPolicy, SessionCoordinator, SessionOutcome, StreamMode};
use crate::storage::{ConversationStore, ConversationTurn, Role};

/// Drives the session core for a conversation: retry/fallback loop,
/// history and persistence.
pub struct ChatClient {
    coordinator: Arc<SessionCoordinator>,
    policy: RetryPolicy,
    store: ConversationStore,
    preferred_mode: Mutex<StreamMode>,
    last_failed: Mutex<Option<String>>,
}

impl ChatClient {
    pub fn new(
        coordinator: Arc<SessionCoordinator>,
        policy: RetryPolicy,
        store: ConversationStore,
        preferred_mode: StreamMode,
    ) -> Self {
        Self {
            coordinator,
            policy,
            store,
            preferred_mode: Mutex::new(preferred_mode),
            last_failed: Mutex::new(None),
        }
    }

    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn preferred_mode(&self) -> StreamMode {
        *self.preferred_mode.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_preferred_mode(&self, mode: StreamMode) {
        log::info!("preferred mode set to {:?}", mode);
        *self.preferred_mode.lock().unwrap_or_else(|p| p.into_inner()) = mode;
    }

    pub fn last_failed(&self) -> Option<String> {
        self.last_failed
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub async fn send_message(
        &self,
        content: &str,
        surface: &mut dyn RenderSurface,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        let content = content.trim();
        if content.is_empty() {
            let error = SessionError::validation(ERROR_EMPTY_MESSAGE);
            surface.show_error(&error);
            return Err(error);
        }

        self.store
            .push(ConversationTurn::new(Role::User, content))
            .await?;
        let request = ChatRequest::from_turns(&self.store.turns().await);

        match self.attempt_loop(&request, surface, cancel).await {
            Ok(outcome) => {
                surface.finish(&outcome.stats);
                self.remember_failure(None);
                self.store
                    .push(ConversationTurn::assistant(
                        outcome.text.clone(),
                        outcome.stats.clone(),
                    ))
                    .await?;
                Ok(outcome)
            }
            Err(error) => {
                self.store.pop_unanswered().await?;
                self.remember_failure(Some(content.to_string()));
                surface.show_error(&error);
                Err(error)
            }
        }
    }

    /// Resends the message of the last turn that failed.
    pub async fn retry_last(
        &self,
        surface: &mut dyn RenderSurface,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        match self.last_failed() {
            Some(content) => self.send_message(&content, surface, cancel).await,
            None => {
                let error = SessionError::validation("Nothing to retry");
                surface.show_error(&error);
                Err(error)
            }
        }
    }

    pub fn reset_metrics(&self) {
        self.coordinator.monitor().lock().recorder.reset();
    }

    pub async fn clear_history(&self) -> Result<(), SessionError> {
        self.remember_failure(None);
        self.store.clear().await
    }

    fn remember_failure(&self, content: Option<String>) {
        *self.last_failed.lock().unwrap_or_else(|p| p.into_inner()) = content;
    }

    async fn attempt_loop(
        &self,
        request: &ChatRequest,
        surface: &mut dyn RenderSurface,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        let bus = self.coordinator.bus();
        let mut mode = self.preferred_mode();
        let mut attempt: u32 = 0;
        let mut fell_back = false;

        loop {
            attempt += 1;
            let error = match self.coordinator.run(request, mode, surface, cancel).await {
                Ok(mut outcome) => {
                    outcome.stats.attempts = attempt;
                    return Ok(outcome);
                }
                Err(error) => error,
            };

            let decision = if fell_back {
                RetryDecision::TerminalFailure
            } else {
                self.policy.decide(&error, attempt, mode.is_streaming())
            };

            match decision {
                RetryDecision::Retry => {
                    log::warn!(
                        "attempt {}/{} failed ({}), retrying in {}s",
                        attempt,
                        self.policy.max_attempts,
                        error.kind().as_str(),
                        self.policy.retry_delay.as_secs_f64()
                    );
                    bus.publish(SessionEvent::Retrying {
                        attempt,
                        max_attempts: self.policy.max_attempts,
                        delay_ms: self.policy.retry_delay.as_millis() as u64,
                    });
                    surface.discard_partial();
                    self.policy.wait(cancel).await?;
                }
                RetryDecision::FallbackToStandard => {
                    log::warn!(
                        "streaming failed ({}) after {} attempts, falling back to standard mode",
                        error.kind().as_str(),
                        attempt
                    );
                    bus.publish(SessionEvent::FallingBack {
                        reason: error.kind(),
                    });
                    surface.discard_partial();
                    mode = StreamMode::Standard;
                    fell_back = true;
                }
                RetryDecision::TerminalFailure => return Err(error),
            }
        }
    }
}

enum Command {
    Retry,
    Mode(StreamMode),
    Stats,
    Reset,
    Clear,
    Quit,
    Unknown(String),
    Message(String),
}

fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    let Some(command) = trimmed.strip_prefix('/') else {
        return Command::Message(trimmed.to_string());
    };
    match command.split_whitespace().next().unwrap_or_default() {
        "retry" => Command::Retry,
        "standard" => Command::Mode(StreamMode::Standard),
        "stream" => Command::Mode(StreamMode::Streaming),
        "stats" => Command::Stats,
        "reset" => Command::Reset,
        "clear" => Command::Clear,
        "quit" | "exit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    }
}

fn print_stats(client: &ChatClient) {
    let monitor = client.coordinator().monitor().snapshot();
    let averages = monitor.recorder.averages();
    let counters = monitor.recorder.counters();
    let thresholds = &monitor.thresholds;

    eprintln!(
        "capability: {} | mode: {:?}",
        monitor.profile.level.as_str(),
        client.preferred_mode()
    );
    eprintln!(
        "requests: {} | successful: {} | timeouts: {} | connection failures: {} | success rate: {:.0}%",
        counters.total_requests,
        counters.successful_requests,
        counters.timeout_count,
        counters.connection_failure_count,
        averages.success_rate * 100.0
    );
    eprintln!(
        "avg response: {:.0}ms | avg words/s: {:.2} | avg chunk latency: {:.0}ms",
        averages.avg_response_time, averages.avg_words_per_second, averages.avg_chunk_latency
    );
    eprintln!(
        "next timeout: {}s | slow: {}ms | very slow: {}ms | min words/s: {:.2} | max chunk latency: {}ms",
        monitor.next_timeout().as_secs(),
        thresholds.slow_response_ms,
        thresholds.very_slow_response_ms,
        thresholds.min_words_per_second,
        thresholds.max_chunk_latency_ms
    );
}

/// Ctrl-C watcher for one turn: the signal cancels the turn's token
/// instead of killing the process.
pub(crate) struct InterruptGuard {
    token: CancellationToken,
    watcher: JoinHandle<()>,
}

impl InterruptGuard {
    pub(crate) fn arm() -> Self {
        let token = CancellationToken::new();
        let watched = token.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                watched.cancel();
            }
        });
        Self { token, watcher }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Line-oriented chat on stdin until `/quit`, EOF or Ctrl-C while idle.
pub async fn run_interactive(
    client: &ChatClient,
    surface: &mut dyn RenderSurface,
) -> Result<(), SessionError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("synapse-stream: type a message, /stats, /retry, /standard, /stream, /reset, /clear or /quit");

    loop {
        eprint!("> ");
        let line = tokio::select! {
            line = lines.next_line() => line.map_err(|e| SessionError::unknown(&format!("failed to read input: {}", e)))?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            eprintln!();
            break;
        };

        match parse_command(&line) {
            Command::Quit => break,
            Command::Stats => print_stats(client),
            Command::Reset => client.reset_metrics(),
            Command::Clear => {
                client.clear_history().await?;
                eprintln!("conversation cleared");
            }
            Command::Mode(mode) => client.set_preferred_mode(mode),
            Command::Unknown(name) => eprintln!("unknown command: /{}", name),
            Command::Retry => {
                let interrupt = InterruptGuard::arm();
                if let Err(e) = client.retry_last(surface, interrupt.token()).await {
                    log::debug!("retry ended with {}", e);
                }
            }
            Command::Message(content) if content.is_empty() => {}
            Command::Message(content) => {
                let interrupt = InterruptGuard::arm();
                if let Err(e) = client.send_message(&content, surface, interrupt.token()).await {
                    log::debug!("turn ended with {}", e);
                }
            }
        }
    }
    Ok(())
}
