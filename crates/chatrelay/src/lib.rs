//! Chatrelay - session-aware chat proxy for an embeddable chat widget.
//!
//! Turns are routed to a local Ollama model first and fall back to OpenAI
//! when the local model cannot answer. Conversation state is held in memory
//! per session and bounded in size and age.

pub mod config;
pub mod handlers;
pub mod llm;
pub mod logging;
pub mod orchestrator;
pub mod ratelimit;
pub mod response;
pub mod sanitize;
pub mod server;
pub mod session;
pub mod sync;
