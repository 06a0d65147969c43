//! HTTP request handlers.

mod chat;
mod client;
mod health;

pub use chat::{chat, create_session, delete_session, get_messages};
pub use client::{ClientIp, client_ip};
pub use health::health;
