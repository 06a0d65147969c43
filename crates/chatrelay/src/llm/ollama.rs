//! Local inference client for Ollama's native chat API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::ProviderError;
use super::provider::{ChatProvider, build_client, non_empty, with_system_prompt};
use super::types::Message;
use crate::config::{ApiKey, LocalProviderConfig};

/// Client for a local Ollama server (`POST {base_url}/api/chat`).
pub struct LocalInferenceClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<ApiKey>,
    timeout: Duration,
}

impl LocalInferenceClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<ApiKey>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            timeout,
        })
    }

    pub fn from_config(config: &LocalProviderConfig) -> Result<Self, reqwest::Error> {
        Self::new(
            config.base_url.clone(),
            config.model.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_seconds),
        )
    }
}

#[async_trait]
impl ChatProvider for LocalInferenceClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn complete(
        &self,
        system_prompt: &str,
        history: &[Message],
    ) -> Result<String, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let request = OllamaChatRequest {
            model: &self.model,
            messages: with_system_prompt(system_prompt, history),
            stream: false,
        };

        let mut req = self.client.post(&url).json(&request);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key.expose());
        }

        let response = req
            .send()
            .await
            .map_err(|e| ProviderError::from_request(e, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }

        let body: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::from_request(e, self.timeout))?;

        debug!(
            model = %self.model,
            prompt_tokens = body.prompt_eval_count,
            completion_tokens = body.eval_count,
            "Local completion received"
        );

        non_empty(body.message.map(|m| m.content))
    }
}

// --- Ollama wire types ---

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaMessage>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}
