use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::check_cancelled;
use crate::constants::{ACCEPT_EVENT_STREAM, CONTENT_TYPE_JSON};
use crate::error::SessionError;
use crate::http::error::map_reqwest_error;
use crate::streaming::extract_error;

/// Shared HTTP client. No overall timeout: each session arms its own.
pub fn build_http_client() -> Result<reqwest::Client, SessionError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| SessionError::unknown(&format!("failed to build HTTP client: {}", e)))
}

pub struct CancellableRequest<'a> {
    client: &'a reqwest::Client,
    token: CancellationToken,
}

impl<'a> CancellableRequest<'a> {
    pub fn new(client: &'a reqwest::Client, token: CancellationToken) -> Self {
        Self { client, token }
    }

    /// POSTs a JSON body. Non-success statuses become classified errors.
    pub async fn post_json<B: Serialize>(
        &self,
        url: &str,
        body: &B,
        streaming: bool,
    ) -> Result<reqwest::Response, SessionError> {
        check_cancelled!(self.token);

        let accept = if streaming {
            ACCEPT_EVENT_STREAM
        } else {
            CONTENT_TYPE_JSON
        };
        let request_builder = self
            .client
            .post(url)
            .header("Content-Type", CONTENT_TYPE_JSON)
            .header("Accept", accept)
            .json(body);

        tokio::select! {
            result = request_builder.send() => {
                let response = result.map_err(map_reqwest_error)?;
                ensure_success(response, &self.token).await
            }
            _ = self.token.cancelled() => {
                Err(SessionError::request_cancelled())
            }
        }
    }
}

async fn ensure_success(
    response: reqwest::Response,
    cancellation_token: &CancellationToken,
) -> Result<reqwest::Response, SessionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = tokio::select! {
        text = response.text() => text.unwrap_or_default(),
        _ = cancellation_token.cancelled() => return Err(SessionError::request_cancelled()),
    };
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| extract_error(&value))
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.chars().take(200).collect())
        })
        .unwrap_or_else(|| format!("backend error: {}", status));

    log::warn!("backend returned {}: {}", status, message);
    Err(SessionError::from_status(status.as_u16(), message))
}

pub async fn handle_json_response(
    response: reqwest::Response,
    cancellation_token: &CancellationToken,
) -> Result<Value, SessionError> {
    check_cancelled!(cancellation_token);

    tokio::select! {
        result = response.json::<Value>() => {
            let json_value = result.map_err(map_reqwest_error)?;
            match extract_error(&json_value) {
                Some(message) => Err(SessionError::server_error(&message)),
                None => Ok(json_value),
            }
        }
        _ = cancellation_token.cancelled() => {
            Err(SessionError::request_cancelled())
        }
    }
}
