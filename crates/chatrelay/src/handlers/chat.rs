//! Chat and session HTTP handlers.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use super::client::ClientIp;
use crate::response;
use crate::server::AppState;
use crate::session::ChatMessage;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    session_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    session_id: Option<String>,
    /// Kept as raw JSON so non-string input is a validation error, not a
    /// deserialization failure.
    #[serde(default)]
    message: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    session_id: String,
    response: String,
    timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesResponse {
    session_id: String,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSessionResponse {
    session_id: String,
    deleted: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/create-session
pub async fn create_session(State(state): State<AppState>, ClientIp(client): ClientIp) -> Response {
    match state.orchestrator.create_session(&client) {
        Ok(session) => (
            StatusCode::OK,
            Json(CreateSessionResponse {
                session_id: session.id,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/chat
pub async fn chat(
    State(state): State<AppState>,
    ClientIp(client): ClientIp,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return response::bad_request(format!("Invalid request body: {}", rejection.body_text()));
        }
    };

    match state
        .orchestrator
        .chat(&client, req.session_id.as_deref(), &req.message)
        .await
    {
        Ok(reply) => (
            StatusCode::OK,
            Json(ChatResponse {
                session_id: reply.session_id,
                response: reply.response,
                timestamp: reply.timestamp.to_rfc3339(),
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/session/{session_id}/messages
pub async fn get_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.orchestrator.messages(&session_id) {
        Ok(messages) => (
            StatusCode::OK,
            Json(MessagesResponse {
                session_id,
                messages,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// DELETE /api/session/{session_id}
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.orchestrator.delete_session(&session_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(DeleteSessionResponse {
                session_id,
                deleted: true,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
