//! Chat turn orchestration.
//!
//! A turn moves through these steps, any of which can end it with a
//! [`ChatError`]:
//!
//! ```text
//! Validating -> SessionResolving -> Generating(local)
//!            -> Generating(cloud, only if local failed and a key exists)
//!            -> Persisting -> Responding
//! ```
//!
//! The user message is persisted before generation starts, so a failed turn
//! still leaves the user's message in the history, with no assistant reply.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::llm::{
    ChatProvider, CloudInferenceClient, LocalInferenceClient, Message, ProviderError,
};
use crate::ratelimit::RateLimiter;
use crate::sanitize::{sanitize_value, sanitize_with_limit};
use crate::session::{ChatMessage, Session, SessionStore, is_valid_session_id};
use crate::sync::KeyedLocks;

// ============================================================================
// Errors
// ============================================================================

/// Terminal outcome of a failed request.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Bad input or malformed session id.
    #[error("{0}")]
    Validation(String),

    #[error("{reason}")]
    RateLimited {
        reason: String,
        retry_after_seconds: u64,
    },

    #[error("session not found")]
    NotFound,

    /// Local provider failed and no cloud credential is configured.
    #[error("no provider available")]
    NoProviderAvailable,

    /// The last provider attempted failed.
    #[error("provider error: {0}")]
    Provider(#[source] ProviderError),
}

const GENERATION_FAILED: &str =
    "Sorry, I couldn't generate a response right now. Please try again later.";

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ChatError::NotFound => StatusCode::NOT_FOUND,
            ChatError::NoProviderAvailable | ChatError::Provider(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show a client. Provider details are never included.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::Validation(msg) => msg.clone(),
            ChatError::RateLimited { reason, .. } => reason.clone(),
            ChatError::NotFound => "Session not found".to_string(),
            ChatError::NoProviderAvailable | ChatError::Provider(_) => {
                GENERATION_FAILED.to_string()
            }
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub system_prompt: String,
    /// Most recent stored messages sent to a provider.
    pub context_window: usize,
    pub max_message_chars: usize,
    pub max_session_age: Duration,
    /// Upper bound on a single provider call.
    pub provider_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        let config = Config::default();
        Self::from(&config)
    }
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        let provider_timeout = config
            .providers
            .local
            .timeout_seconds
            .max(config.providers.cloud.timeout_seconds);
        Self {
            system_prompt: config.system_prompt.clone(),
            context_window: config.session.context_window,
            max_message_chars: config.session.max_message_chars,
            max_session_age: Duration::from_secs(config.session.max_age_seconds),
            provider_timeout: Duration::from_secs(provider_timeout),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// A successful chat turn.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub session_id: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    /// Which provider produced the response.
    pub provider: &'static str,
}

/// What one maintenance pass removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired_sessions: usize,
    pub pruned_clients: usize,
}

// ============================================================================
// ChatOrchestrator
// ============================================================================

pub struct ChatOrchestrator {
    sessions: SessionStore,
    limiter: RateLimiter,
    local: Option<Arc<dyn ChatProvider>>,
    cloud: Option<Arc<dyn ChatProvider>>,
    turn_locks: KeyedLocks,
    settings: OrchestratorSettings,
}

impl ChatOrchestrator {
    pub fn new(sessions: SessionStore, limiter: RateLimiter, settings: OrchestratorSettings) -> Self {
        Self {
            sessions,
            limiter,
            local: None,
            cloud: None,
            turn_locks: KeyedLocks::new(),
            settings,
        }
    }

    pub fn with_local(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.local = Some(provider);
        self
    }

    pub fn with_cloud(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.cloud = Some(provider);
        self
    }

    /// Build the orchestrator and its provider clients from validated config.
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let mut orchestrator = Self::new(
            SessionStore::new(config.session.max_messages),
            RateLimiter::from_config(&config.rate_limit),
            OrchestratorSettings::from(config),
        );

        if config.providers.local.enabled {
            let local = LocalInferenceClient::from_config(&config.providers.local)?;
            info!(
                base_url = %config.providers.local.base_url,
                model = %config.providers.local.model,
                "Registered local provider"
            );
            orchestrator = orchestrator.with_local(Arc::new(local));
        }

        match CloudInferenceClient::from_config(&config.providers.cloud)? {
            Some(cloud) => {
                info!(model = %config.providers.cloud.model, "Registered cloud provider");
                orchestrator = orchestrator.with_cloud(Arc::new(cloud));
            }
            None => warn!("No cloud credential configured, local failures will not fall back"),
        }

        Ok(orchestrator)
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Start a new, empty session for `client_id`.
    pub fn create_session(&self, client_id: &str) -> Result<Session, ChatError> {
        self.check_rate(client_id)?;
        let session = self.sessions.create(Some(client_id.to_string()));
        info!(session_id = %session.id, "Session started");
        Ok(session)
    }

    /// Run one chat turn.
    ///
    /// `message` is the raw JSON value from the request; anything other than
    /// a non-empty string after sanitization is rejected. An empty
    /// `session_id` starts a new session; an unknown but well-formed one is
    /// recreated empty under the same id.
    pub async fn chat(
        &self,
        client_id: &str,
        session_id: Option<&str>,
        message: &serde_json::Value,
    ) -> Result<ChatReply, ChatError> {
        // Validating
        self.check_rate(client_id)?;

        let content = sanitize_value(message, self.settings.max_message_chars);
        if content.is_empty() {
            return Err(ChatError::Validation(
                "Message is required and must be non-empty text".to_string(),
            ));
        }

        let requested = session_id.filter(|id| !id.is_empty());
        if let Some(id) = requested
            && !is_valid_session_id(id)
        {
            return Err(ChatError::Validation("Invalid session ID format".to_string()));
        }

        // SessionResolving
        let session_id = match requested {
            Some(id) => id.to_string(),
            None => self.sessions.create(Some(client_id.to_string())).id,
        };

        let lock = self.turn_locks.get(&session_id);
        let _turn = lock.lock().await;

        let (_, created) = self
            .sessions
            .get_or_create(&session_id, Some(client_id.to_string()));
        if created && requested.is_some() {
            info!(session_id = %session_id, "Unknown session id, starting fresh");
        }

        // Persist the user turn before generating.
        self.sessions
            .append(&session_id, ChatMessage::user(content))
            .ok_or(ChatError::NotFound)?;

        let history: Vec<Message> = self
            .sessions
            .recent_messages(&session_id, self.settings.context_window)
            .unwrap_or_default()
            .iter()
            .map(Message::from)
            .collect();

        // Generating
        let (response, provider) = self.generate(&session_id, &history).await?;

        // Persisting
        let assistant = ChatMessage::assistant(response.clone());
        let timestamp = assistant.timestamp;
        if self.sessions.append(&session_id, assistant).is_none() {
            warn!(session_id = %session_id, "Session vanished before reply was stored");
        }

        debug!(session_id = %session_id, provider, "Chat turn complete");

        // Responding
        Ok(ChatReply {
            session_id,
            response,
            timestamp,
            provider,
        })
    }

    /// Stored history for a session, oldest first.
    pub fn messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        require_valid_id(session_id)?;
        self.sessions.messages(session_id).ok_or(ChatError::NotFound)
    }

    /// Delete a session. Waits for any in-flight turn on it to finish.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), ChatError> {
        require_valid_id(session_id)?;

        let removed = {
            let lock = self.turn_locks.get(session_id);
            let _turn = lock.lock().await;
            self.sessions.delete(session_id)
        };
        self.turn_locks.remove(session_id);

        if removed {
            info!(session_id = %session_id, "Session deleted");
            Ok(())
        } else {
            Err(ChatError::NotFound)
        }
    }

    /// Expire idle sessions and drop idle rate-limit state.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let expired = self.sessions.sweep(self.settings.max_session_age);
        self.turn_locks.prune();
        let pruned_clients = self.limiter.prune_idle();

        let report = MaintenanceReport {
            expired_sessions: expired.len(),
            pruned_clients,
        };
        if report != MaintenanceReport::default() {
            info!(
                expired_sessions = report.expired_sessions,
                pruned_clients = report.pruned_clients,
                remaining_sessions = self.sessions.len(),
                "Maintenance pass complete"
            );
        }
        report
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_local(&self) -> bool {
        self.local.is_some()
    }

    pub fn has_cloud(&self) -> bool {
        self.cloud.is_some()
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn check_rate(&self, client_id: &str) -> Result<(), ChatError> {
        let decision = self.limiter.check(client_id);
        if decision.allowed {
            return Ok(());
        }
        let reason = decision
            .reason
            .unwrap_or_else(|| "Rate limit exceeded".to_string());
        debug!(client_id, reason = %reason, "Request rate limited");
        Err(ChatError::RateLimited {
            reason,
            retry_after_seconds: decision.retry_after_seconds.unwrap_or(60),
        })
    }

    /// Local first, then cloud if a local attempt failed and cloud exists.
    async fn generate(
        &self,
        session_id: &str,
        history: &[Message],
    ) -> Result<(String, &'static str), ChatError> {
        if let Some(ref local) = self.local {
            match self.attempt(local.as_ref(), history).await {
                Ok(text) => return Ok((text, local.name())),
                Err(e) => warn!(
                    session_id,
                    provider = local.name(),
                    kind = e.kind(),
                    error = %e,
                    "Local provider failed"
                ),
            }
        }

        let Some(ref cloud) = self.cloud else {
            error!(session_id, "No provider left to try");
            return Err(ChatError::NoProviderAvailable);
        };

        match self.attempt(cloud.as_ref(), history).await {
            Ok(text) => Ok((text, cloud.name())),
            Err(e) => {
                error!(
                    session_id,
                    provider = cloud.name(),
                    kind = e.kind(),
                    error = %e,
                    "Cloud provider failed"
                );
                Err(ChatError::Provider(e))
            }
        }
    }

    /// One bounded provider call with its output sanitized.
    async fn attempt(
        &self,
        provider: &dyn ChatProvider,
        history: &[Message],
    ) -> Result<String, ProviderError> {
        let timeout = self.settings.provider_timeout;
        let raw = tokio::time::timeout(
            timeout,
            provider.complete(&self.settings.system_prompt, history),
        )
        .await
        .map_err(|_| ProviderError::Timeout(timeout))??;

        let text = sanitize_with_limit(&raw, self.settings.max_message_chars);
        if text.is_empty() {
            return Err(ProviderError::BadResponse(
                "completion empty after sanitization".to_string(),
            ));
        }
        Ok(text)
    }
}

fn require_valid_id(session_id: &str) -> Result<(), ChatError> {
    if is_valid_session_id(session_id) {
        Ok(())
    } else {
        Err(ChatError::Validation("Invalid session ID format".to_string()))
    }
}

/// Spawn the periodic maintenance task. Stops when `cancel` fires.
pub fn spawn_maintenance_task(
    orchestrator: Arc<ChatOrchestrator>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    orchestrator.run_maintenance();
                }
                _ = cancel.cancelled() => {
                    debug!("Maintenance task stopped");
                    break;
                }
            }
        }
    })
}

// ============================================================================
// Tests
// ============================================================================
