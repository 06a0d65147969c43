//! JSON error envelopes for the HTTP API.
//!
//! Bodies carry a short `error` and, where useful, a `message`. Provider and
//! internal failures always get a generic message; details stay in the logs.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::orchestrator::ChatError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

fn error_response(status: StatusCode, body: ErrorBody) -> Response {
    (status, Json(body)).into_response()
}

pub fn bad_request(error: impl Into<String>) -> Response {
    error_response(
        StatusCode::BAD_REQUEST,
        ErrorBody {
            error: error.into(),
            message: None,
            retry_after: None,
        },
    )
}

pub fn not_found(error: impl Into<String>) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        ErrorBody {
            error: error.into(),
            message: None,
            retry_after: None,
        },
    )
}

pub fn internal_error(message: impl Into<String>) -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorBody {
            error: "Internal server error".to_string(),
            message: Some(message.into()),
            retry_after: None,
        },
    )
}

/// 429 with both a `Retry-After` header and a `retryAfter` body field.
pub fn rate_limited(reason: impl Into<String>, retry_after_seconds: u64) -> Response {
    let mut response = error_response(
        StatusCode::TOO_MANY_REQUESTS,
        ErrorBody {
            error: "Too many requests".to_string(),
            message: Some(reason.into()),
            retry_after: Some(retry_after_seconds),
        },
    );
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_seconds));
    response
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let message = self.public_message();
        match self {
            ChatError::RateLimited {
                retry_after_seconds,
                ..
            } => rate_limited(message, retry_after_seconds),
            ChatError::Validation(_) => bad_request(message),
            ChatError::NotFound => not_found(message),
            ChatError::NoProviderAvailable | ChatError::Provider(_) => internal_error(message),
        }
    }
}
