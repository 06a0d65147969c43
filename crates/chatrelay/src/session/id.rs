//! Session identifiers.
//!
//! Format: `session_<32 lowercase hex chars>_<unix millis>`. The hex part
//! comes from 128 bits of OS-seeded CSPRNG output, so ids are neither
//! sequential nor guessable. The timestamp only aids debugging.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;

pub const SESSION_ID_PREFIX: &str = "session";

static SESSION_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^session_[0-9a-f]{32}_[0-9]{10,20}$").expect("valid session id regex")
});

/// Generate a fresh session id.
pub fn generate_session_id() -> String {
    let entropy: [u8; 16] = rand::random();
    format!(
        "{}_{}_{}",
        SESSION_ID_PREFIX,
        hex::encode(entropy),
        Utc::now().timestamp_millis()
    )
}

/// Check an id against the session id format.
pub fn is_valid_session_id(id: &str) -> bool {
    SESSION_ID_RE.is_match(id)
}
