use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::check_cancelled;
use crate::constants::{DEFAULT_MAX_ATTEMPTS, TIMEOUT_RETRY_LIMIT};
use crate::error::{ErrorKind, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryDecision {
    Retry,
    FallbackToStandard,
    TerminalFailure,
}

/// What to do after streaming attempt `attempt` (1-based) failed with `kind`.
pub fn decide(kind: ErrorKind, attempt: u32, max_attempts: u32) -> RetryDecision {
    match kind {
        ErrorKind::Validation
        | ErrorKind::ServiceUnavailable
        | ErrorKind::Cancelled
        | ErrorKind::SessionActive => RetryDecision::TerminalFailure,
        // the timeout budget is already generous; fall back instead of looping
        ErrorKind::Timeout => {
            if attempt < TIMEOUT_RETRY_LIMIT.min(max_attempts) {
                RetryDecision::Retry
            } else {
                RetryDecision::FallbackToStandard
            }
        }
        ErrorKind::Network | ErrorKind::ServerError | ErrorKind::Unknown => {
            if attempt < max_attempts {
                RetryDecision::Retry
            } else {
                RetryDecision::FallbackToStandard
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    /// Decision for a failure in `mode_is_streaming`; a standard-mode request
    /// has nothing left to fall back to.
    pub fn decide(&self, error: &SessionError, attempt: u32, mode_is_streaming: bool) -> RetryDecision {
        match decide(error.kind(), attempt, self.max_attempts) {
            RetryDecision::FallbackToStandard if !mode_is_streaming => RetryDecision::TerminalFailure,
            decision => decision,
        }
    }

    /// Fixed backoff before the next attempt; aborts early on cancellation.
    pub async fn wait(&self, cancellation_token: &CancellationToken) -> Result<(), SessionError> {
        check_cancelled!(cancellation_token);
        tokio::select! {
            _ = sleep(self.retry_delay) => Ok(()),
            _ = cancellation_token.cancelled() => Err(SessionError::request_cancelled()),
        }
    }
}
