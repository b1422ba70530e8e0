use crate::constants::ERROR_BACKEND_UNAVAILABLE;
use crate::error::SessionError;

pub fn map_reqwest_error(err: reqwest::Error) -> SessionError {
    if err.is_connect() {
        SessionError::backend_unavailable()
    } else if err.is_timeout() {
        SessionError::timeout()
    } else if err.is_request() || err.is_body() {
        log::error!("HTTP transport failed: {}", err);
        SessionError::network(&format!("{}: {}", ERROR_BACKEND_UNAVAILABLE, err))
    } else if err.is_decode() {
        SessionError::unknown(&format!("invalid response from backend: {}", err))
    } else {
        log::error!("HTTP request failed: {}", err);
        SessionError::unknown(&format!("backend request failed: {}", err))
    }
}
