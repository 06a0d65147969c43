use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use serde::Serialize;

use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: &'static str,
    timestamp: String,
    uptime_seconds: u64,
    active_sessions: usize,
    providers: ProviderStatus,
}

#[derive(Serialize)]
pub struct ProviderStatus {
    local: bool,
    cloud: bool,
}

/// GET /health
///
/// Reports configuration only; providers are never probed.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let orchestrator = &state.orchestrator;
    let body = HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        active_sessions: orchestrator.session_count(),
        providers: ProviderStatus {
            local: orchestrator.has_local(),
            cloud: orchestrator.has_cloud(),
        },
    };
    (StatusCode::OK, Json(body))
}
