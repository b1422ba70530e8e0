use std::error::Error;
use std::fmt;

use serde::Serialize;

use crate::constants::{ERROR_BACKEND_UNAVAILABLE, ERROR_CANCELLED, ERROR_SESSION_ACTIVE, ERROR_TIMEOUT};

/// Failure classes a chat turn can end in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Network,
    ServerError,
    Validation,
    ServiceUnavailable,
    Unknown,
    Cancelled,
    SessionActive,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Validation => "validation",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Unknown => "unknown",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::SessionActive => "session_active",
        }
    }
}

/// Something the user can do after a failed turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    SwitchToStandardMode,
    Refresh,
    EditMessage,
    Wait,
}

impl RecoveryAction {
    pub fn label(&self) -> &'static str {
        match self {
            RecoveryAction::Retry => "retry the message",
            RecoveryAction::SwitchToStandardMode => "switch to standard mode (/standard)",
            RecoveryAction::Refresh => "restart the client",
            RecoveryAction::EditMessage => "edit the message and send it again",
            RecoveryAction::Wait => "wait a moment before trying again",
        }
    }
}

/// Error type for a chat session
#[derive(Debug, Clone)]
pub struct SessionError {
    pub message: String,
    pub status_code: Option<u16>,
    kind: ErrorKind,
}

impl SessionError {
    pub fn new(message: String, kind: ErrorKind) -> Self {
        Self {
            message,
            status_code: None,
            kind,
        }
    }

    pub fn timeout() -> Self {
        Self::new(ERROR_TIMEOUT.to_string(), ErrorKind::Timeout)
    }

    pub fn network(message: &str) -> Self {
        Self::new(message.to_string(), ErrorKind::Network)
    }

    pub fn backend_unavailable() -> Self {
        Self::network(ERROR_BACKEND_UNAVAILABLE)
    }

    pub fn server_error(message: &str) -> Self {
        Self::new(message.to_string(), ErrorKind::ServerError)
    }

    pub fn validation(message: &str) -> Self {
        Self::new(message.to_string(), ErrorKind::Validation)
    }

    pub fn unknown(message: &str) -> Self {
        Self::new(message.to_string(), ErrorKind::Unknown)
    }

    pub fn request_cancelled() -> Self {
        Self::new(ERROR_CANCELLED.to_string(), ErrorKind::Cancelled)
    }

    pub fn session_active() -> Self {
        Self::new(ERROR_SESSION_ACTIVE.to_string(), ErrorKind::SessionActive)
    }

    /// Classifies a non-success HTTP status from the backend.
    pub fn from_status(status_code: u16, message: String) -> Self {
        let kind = match status_code {
            503 => ErrorKind::ServiceUnavailable,
            400..=499 => ErrorKind::Validation,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::Unknown,
        };
        Self {
            message,
            status_code: Some(status_code),
            kind,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::Timeout => {
                "The assistant took too long to respond. The host may be busy.".to_string()
            }
            ErrorKind::Network => {
                "Could not reach the Synapse backend. Check that it is running.".to_string()
            }
            ErrorKind::ServerError => format!("The backend failed to answer: {}", self.message),
            ErrorKind::Validation => format!("The request was rejected: {}", self.message),
            ErrorKind::ServiceUnavailable => {
                "The model service is unavailable right now.".to_string()
            }
            ErrorKind::Unknown => format!("Something went wrong: {}", self.message),
            ErrorKind::Cancelled => "The response was cancelled.".to_string(),
            ErrorKind::SessionActive => {
                "Wait for the current response to finish before sending another.".to_string()
            }
        }
    }

    pub fn recovery_actions(&self) -> Vec<RecoveryAction> {
        match self.kind {
            ErrorKind::Timeout => vec![RecoveryAction::Retry, RecoveryAction::SwitchToStandardMode],
            ErrorKind::Network => vec![RecoveryAction::Retry, RecoveryAction::Refresh],
            ErrorKind::ServerError | ErrorKind::Unknown => vec![
                RecoveryAction::Retry,
                RecoveryAction::SwitchToStandardMode,
                RecoveryAction::Refresh,
            ],
            ErrorKind::Validation => vec![RecoveryAction::EditMessage],
            ErrorKind::ServiceUnavailable => vec![RecoveryAction::Wait, RecoveryAction::Refresh],
            ErrorKind::Cancelled => vec![RecoveryAction::Retry],
            ErrorKind::SessionActive => vec![RecoveryAction::Wait],
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} ({}): {}", self.kind.as_str(), code, self.message),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

impl Error for SessionError {}

#[macro_export]
macro_rules! check_cancelled {
    ($token:expr) => {
        if $token.is_cancelled() {
            return Err($crate::error::SessionError::request_cancelled());
        }
    };
}
