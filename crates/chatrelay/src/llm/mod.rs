//! LLM provider clients for chat completions.

mod error;
mod ollama;
mod openai;
mod provider;
mod types;

pub use error::ProviderError;
pub use ollama::LocalInferenceClient;
pub use openai::CloudInferenceClient;
pub use provider::ChatProvider;
pub use types::{Message, Role};
