//! LLM provider trait.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::error::ProviderError;
use super::types::Message;

/// A text-generation backend that answers one chat turn per call.
///
/// Implementations do not retry; retry and fallback policy belongs to the
/// caller.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    /// Generate a reply to `history` under `system_prompt`.
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[Message],
    ) -> Result<String, ProviderError>;
}

/// Prepend the system prompt to the conversation.
pub(super) fn with_system_prompt(system_prompt: &str, history: &[Message]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(system_prompt));
    messages.extend_from_slice(history);
    messages
}

/// HTTP client with a whole-request timeout.
pub(super) fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).build()
}

/// Reject empty generations.
pub(super) fn non_empty(content: Option<String>) -> Result<String, ProviderError> {
    match content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(ProviderError::BadResponse("empty completion".to_string())),
    }
}
