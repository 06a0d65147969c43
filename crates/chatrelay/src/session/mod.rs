//! In-memory conversation sessions.

mod id;
mod store;

pub use id::{SESSION_ID_PREFIX, generate_session_id, is_valid_session_id};
pub use store::{ChatMessage, Session, SessionStore};
