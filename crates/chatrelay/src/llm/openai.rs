//! Cloud inference client for the OpenAI chat completions API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::error::ProviderError;
use super::provider::{ChatProvider, build_client, non_empty, with_system_prompt};
use super::types::{CompletionRequest, CompletionResponse, Message};
use crate::config::{ApiKey, CloudProviderConfig};

/// Client for OpenAI-compatible `POST {base_url}/chat/completions`.
///
/// The credential is format-checked at startup by config validation and is
/// only ever written into the `Authorization` header.
pub struct CloudInferenceClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: ApiKey,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl CloudInferenceClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: ApiKey,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            temperature: None,
            max_tokens: None,
            timeout,
        })
    }

    /// Build the client if a credential is configured.
    pub fn from_config(config: &CloudProviderConfig) -> Result<Option<Self>, reqwest::Error> {
        let Some(ref api_key) = config.api_key else {
            return Ok(None);
        };
        let client = Self::new(
            config.base_url.clone(),
            config.model.clone(),
            api_key.clone(),
            Duration::from_secs(config.timeout_seconds),
        )?
        .with_sampling(config.temperature, config.max_tokens);
        Ok(Some(client))
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = Some(temperature);
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
impl ChatProvider for CloudInferenceClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(
        &self,
        system_prompt: &str,
        history: &[Message],
    ) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = CompletionRequest {
            model: &self.model,
            messages: with_system_prompt(system_prompt, history),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::from_request(e, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::from_request(e, self.timeout))?;

        if let Some(usage) = body.usage {
            debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Cloud completion received"
            );
        }

        non_empty(body.into_first_content())
    }
}
