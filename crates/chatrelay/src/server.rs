use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::routing::{delete, get, post};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::warn;

use crate::config::ServerConfig;
use crate::handlers;
use crate::orchestrator::ChatOrchestrator;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChatOrchestrator>,
    pub started_at: Instant,
    /// Whether forwarded-for headers identify the client.
    pub trust_proxy: bool,
}

impl AppState {
    pub fn new(orchestrator: Arc<ChatOrchestrator>) -> Self {
        Self {
            orchestrator,
            started_at: Instant::now(),
            trust_proxy: false,
        }
    }
}

pub fn build_app(state: AppState, config: &ServerConfig) -> Router {
    let state = AppState {
        trust_proxy: config.trust_proxy,
        ..state
    };

    let api = Router::new()
        .route("/create-session", post(handlers::create_session))
        .route("/chat", post(handlers::chat))
        .route(
            "/session/{session_id}/messages",
            get(handlers::get_messages),
        )
        .route("/session/{session_id}", delete(handlers::delete_session));

    let mut app = Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .with_state(state);

    if let Some(cors) = cors_layer(&config.allowed_origins) {
        app = app.layer(cors);
    }

    app.layer(TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(config.request_timeout_seconds),
    ))
}

/// CORS for the configured widget origins. `None` when no origin is allowed.
fn cors_layer(allowed_origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid allowed origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]),
    )
}
