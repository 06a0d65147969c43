//! LLM provider error types.

use std::time::Duration;

use thiserror::Error;

/// Longest slice of an upstream error body kept for logging.
const MAX_ERROR_BODY: usize = 200;

/// Why a single completion call failed.
///
/// Messages are for server-side logs only and are never sent to clients.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Connection failure or non-success HTTP status.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// No response within the configured timeout.
    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    /// The provider answered, but not with usable text.
    #[error("bad provider response: {0}")]
    BadResponse(String),
}

impl ProviderError {
    /// Classify a transport error.
    pub fn from_request(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(timeout)
        } else if err.is_decode() {
            ProviderError::BadResponse(err.to_string())
        } else {
            ProviderError::Unavailable(err.to_string())
        }
    }

    /// Build the error for a non-success status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let body: String = body.chars().take(MAX_ERROR_BODY).collect();
        ProviderError::Unavailable(format!("status {status}: {body}"))
    }

    /// Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Unavailable(_) => "unavailable",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::BadResponse(_) => "bad_response",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_truncates_body() {
        let body = "e".repeat(1000);
        let err = ProviderError::from_status(502, &body);
        let message = err.to_string();
        assert!(message.contains("status 502"));
        assert!(message.len() < 300);
        assert_eq!(err.kind(), "unavailable");
    }

    #[test]
    fn kinds() {
        assert_eq!(ProviderError::Timeout(Duration::from_secs(1)).kind(), "timeout");
        assert_eq!(
            ProviderError::BadResponse("empty".to_string()).kind(),
            "bad_response"
        );
    }
}
