//! Tracing subscriber setup.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "CHATRELAY_LOG";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    FilterParse(#[from] tracing_subscriber::filter::ParseError),

    #[error("failed to initialize subscriber: {0}")]
    Init(String),
}

/// Install the global subscriber.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_env_filter(
        std::env::var(LOG_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
        &config.level,
    )?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    }
    .map_err(|e| LoggingError::Init(e.to_string()))
}

/// Pick the first filter source that is set: `CHATRELAY_LOG`, `RUST_LOG`,
/// then the configured level.
fn build_env_filter(
    app_filter: Option<String>,
    rust_log: Option<String>,
    default_level: &str,
) -> Result<EnvFilter, LoggingError> {
    let set = |d: &String| !d.trim().is_empty();
    let directive = app_filter
        .filter(set)
        .or(rust_log.filter(set))
        .unwrap_or_else(|| default_level.to_string());
    Ok(EnvFilter::try_new(directive)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_filter_wins() {
        let filter = build_env_filter(
            Some("chatrelay=trace".to_string()),
            Some("warn".to_string()),
            "info",
        )
        .unwrap();
        assert!(filter.to_string().contains("chatrelay=trace"));
    }

    #[test]
    fn falls_back_to_default_level() {
        let filter = build_env_filter(None, None, "debug").unwrap();
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn rejects_garbage_directive() {
        assert!(build_env_filter(Some("chatrelay=verbose".to_string()), None, "info").is_err());
    }
}
