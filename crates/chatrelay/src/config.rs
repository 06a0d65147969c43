use std::fmt;
use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            providers: ProvidersConfig::default(),
            rate_limit: RateLimitConfig::default(),
            session: SessionConfig::default(),
            system_prompt: default_system_prompt(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load the config file, falling back to defaults when it does not exist.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Empty values are ignored so that `OPENAI_API_KEY=` does not count as a
    /// configured credential.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("PORT") {
            self.server.port = parse_override("PORT", &v)?;
        }
        if let Some(v) = get("TRUST_PROXY") {
            self.server.trust_proxy = parse_override("TRUST_PROXY", &v)?;
        }
        if let Some(v) = get("ALLOWED_ORIGINS") {
            self.server.allowed_origins = v
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(v) = get("OLLAMA_BASE_URL") {
            self.providers.local.base_url = v;
        }
        if let Some(v) = get("OLLAMA_MODEL") {
            self.providers.local.model = v;
        }
        if let Some(v) = get("OLLAMA_API_KEY") {
            self.providers.local.api_key = Some(ApiKey::new(v));
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.providers.cloud.api_key = Some(ApiKey::new(v));
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.providers.cloud.model = v;
        }
        if let Some(v) = get("RATE_LIMIT_PER_MINUTE") {
            self.rate_limit.per_minute = parse_override("RATE_LIMIT_PER_MINUTE", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_PER_HOUR") {
            self.rate_limit.per_hour = parse_override("RATE_LIMIT_PER_HOUR", &v)?;
        }
        Ok(())
    }

    /// Validate the configuration once, before serving traffic.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("rate_limit.per_minute", u64::from(self.rate_limit.per_minute))?;
        require_nonzero("rate_limit.per_hour", u64::from(self.rate_limit.per_hour))?;
        require_nonzero("session.max_age_seconds", self.session.max_age_seconds)?;
        require_nonzero(
            "session.sweep_interval_seconds",
            self.session.sweep_interval_seconds,
        )?;
        require_nonzero("session.max_messages", self.session.max_messages as u64)?;
        require_nonzero("session.context_window", self.session.context_window as u64)?;
        require_nonzero(
            "session.max_message_chars",
            self.session.max_message_chars as u64,
        )?;
        require_nonzero(
            "providers.local.timeout_seconds",
            self.providers.local.timeout_seconds,
        )?;
        require_nonzero(
            "providers.cloud.timeout_seconds",
            self.providers.cloud.timeout_seconds,
        )?;

        if self.session.context_window > self.session.max_messages {
            return Err(ConfigError::InvalidValue {
                field: "session.context_window",
                reason: "must not exceed session.max_messages".to_string(),
            });
        }

        if let Some(ref key) = self.providers.cloud.api_key {
            key.validate_cloud()?;
        }

        // A turn may wait out the local timeout before trying cloud.
        let mut worst_turn = 0;
        if self.providers.local.enabled {
            worst_turn += self.providers.local.timeout_seconds;
        }
        if self.providers.cloud.api_key.is_some() {
            worst_turn += self.providers.cloud.timeout_seconds;
        }
        if self.server.request_timeout_seconds <= worst_turn {
            return Err(ConfigError::InvalidValue {
                field: "server.request_timeout_seconds",
                reason: format!("must exceed the combined provider timeouts ({worst_turn}s)"),
            });
        }

        if !self.providers.local.enabled && self.providers.cloud.api_key.is_none() {
            return Err(ConfigError::NoProvider);
        }

        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: key,
        reason: format!("'{}' is not a valid value", value),
    })
}

fn require_nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

fn default_system_prompt() -> String {
    "You are a friendly assistant embedded in a website chat widget. \
     Answer clearly and concisely, and say so when you do not know something."
        .to_string()
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Origins allowed to call the API from a browser. Empty disables CORS.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`. Only
    /// safe behind a reverse proxy that overwrites those headers.
    #[serde(default)]
    pub trust_proxy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            allowed_origins: Vec::new(),
            trust_proxy: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    90
}

// ============================================================================
// ProvidersConfig
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub local: LocalProviderConfig,
    #[serde(default)]
    pub cloud: CloudProviderConfig,
}

/// Local inference (Ollama) settings.
#[derive(Debug, Deserialize)]
pub struct LocalProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_local_base_url")]
    pub base_url: String,
    #[serde(default = "default_local_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<ApiKey>,
    #[serde(default = "default_provider_timeout")]
    pub timeout_seconds: u64,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_local_base_url(),
            model: default_local_model(),
            api_key: None,
            timeout_seconds: default_provider_timeout(),
        }
    }
}

/// Cloud inference (OpenAI) settings. Without `api_key` there is no fallback.
#[derive(Debug, Deserialize)]
pub struct CloudProviderConfig {
    #[serde(default)]
    pub api_key: Option<ApiKey>,
    #[serde(default = "default_cloud_base_url")]
    pub base_url: String,
    #[serde(default = "default_cloud_model")]
    pub model: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for CloudProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_cloud_base_url(),
            model: default_cloud_model(),
            timeout_seconds: default_provider_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_local_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_local_model() -> String {
    "llama3.2".to_string()
}

fn default_cloud_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_cloud_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    300
}

// ============================================================================
// ApiKey
// ============================================================================

/// A provider credential. Never printed, never serialized.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    /// Required prefix for cloud credentials.
    pub const CLOUD_PREFIX: &'static str = "sk-";
    /// Minimum length for cloud credentials.
    pub const CLOUD_MIN_LEN: usize = 20;

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Check the cloud credential format.
    pub fn validate_cloud(&self) -> Result<(), ConfigError> {
        if !self.0.starts_with(Self::CLOUD_PREFIX) {
            return Err(ConfigError::InvalidCredential("missing 'sk-' prefix"));
        }
        if self.0.len() < Self::CLOUD_MIN_LEN {
            return Err(ConfigError::InvalidCredential("too short"));
        }
        Ok(())
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

// ============================================================================
// RateLimitConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,
    #[serde(default = "default_per_hour")]
    pub per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
            per_hour: default_per_hour(),
        }
    }
}

fn default_per_minute() -> u32 {
    60
}

fn default_per_hour() -> u32 {
    1000
}

// ============================================================================
// SessionConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_age")]
    pub max_age_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Stored history cap per session.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Number of most recent messages sent to a provider.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_seconds: default_max_age(),
            sweep_interval_seconds: default_sweep_interval(),
            max_messages: default_max_messages(),
            context_window: default_context_window(),
            max_message_chars: default_max_message_chars(),
        }
    }
}

fn default_max_age() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval() -> u64 {
    60 * 60
}

fn default_max_messages() -> usize {
    20
}

fn default_context_window() -> usize {
    10
}

fn default_max_message_chars() -> usize {
    crate::sanitize::MAX_MESSAGE_CHARS
}

// ============================================================================
// LoggingConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("invalid cloud provider credential: {0}")]
    InvalidCredential(&'static str),

    #[error(
        "no usable provider: enable providers.local or set a cloud credential (OPENAI_API_KEY)"
    )]
    NoProvider,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    const VALID_KEY: &str = "sk-test-0123456789abcdef";

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.request_timeout_seconds, 90);
        assert!(!config.server.trust_proxy);
        assert!(config.server.allowed_origins.is_empty());
        assert!(config.providers.local.enabled);
        assert_eq!(config.providers.local.base_url, "http://localhost:11434");
        assert!(config.providers.cloud.api_key.is_none());
        assert_eq!(config.providers.cloud.max_tokens, 300);
        assert_eq!(config.rate_limit.per_minute, 60);
        assert_eq!(config.rate_limit.per_hour, 1000);
        assert_eq!(config.session.max_age_seconds, 86_400);
        assert_eq!(config.session.sweep_interval_seconds, 3600);
        assert_eq!(config.session.max_messages, 20);
        assert_eq!(config.session.context_window, 10);
        assert_eq!(config.session.max_message_chars, 1000);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_defaults() {
        let tmp_dir = TempDir::new().unwrap();
        let missing_path = tmp_dir.path().join("missing-config.yaml");
        let config = Config::load(&missing_path).await.unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[tokio::test]
    async fn test_load_valid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  host: "127.0.0.1"
  port: 8081
  allowed_origins:
    - "https://example.com"
  trust_proxy: true
providers:
  local:
    enabled: false
  cloud:
    api_key: "{VALID_KEY}"
    model: "gpt-4"
rate_limit:
  per_minute: 10
session:
  max_age_seconds: 600
logging:
  format: json
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.allowed_origins, vec!["https://example.com"]);
        assert!(config.server.trust_proxy);
        assert!(!config.providers.local.enabled);
        assert_eq!(
            config.providers.cloud.api_key.as_ref().unwrap().expose(),
            VALID_KEY
        );
        assert_eq!(config.providers.cloud.model, "gpt-4");
        assert_eq!(config.rate_limit.per_minute, 10);
        assert_eq!(config.rate_limit.per_hour, 1000); // default
        assert_eq!(config.session.max_age_seconds, 600);
        assert_eq!(config.session.max_messages, 20); // default
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(file.path()).await;
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[
                ("PORT", "9000"),
                ("OPENAI_API_KEY", VALID_KEY),
                ("OLLAMA_MODEL", "mistral"),
                ("ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
                ("RATE_LIMIT_PER_HOUR", "50"),
                ("TRUST_PROXY", "true"),
            ]))
            .unwrap();

        assert!(config.server.trust_proxy);

        assert_eq!(config.server.port, 9000);
        assert!(config.providers.cloud.api_key.is_some());
        assert_eq!(config.providers.local.model, "mistral");
        assert_eq!(
            config.server.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(config.rate_limit.per_hour, 50);
    }

    #[test]
    fn test_empty_env_value_is_ignored() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[("OPENAI_API_KEY", "  ")]))
            .unwrap();
        assert!(config.providers.cloud.api_key.is_none());
    }

    #[test]
    fn test_invalid_numeric_override() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(env(&[("PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "PORT", .. }));
    }

    #[test]
    fn test_cloud_key_format() {
        assert!(ApiKey::new(VALID_KEY).validate_cloud().is_ok());
        assert!(matches!(
            ApiKey::new("pk-0123456789abcdefghij").validate_cloud(),
            Err(ConfigError::InvalidCredential(_))
        ));
        assert!(matches!(
            ApiKey::new("sk-short").validate_cloud(),
            Err(ConfigError::InvalidCredential(_))
        ));
    }

    #[test]
    fn test_malformed_cloud_key_fails_validation() {
        let mut config = Config::default();
        config.providers.cloud.api_key = Some(ApiKey::new("not-a-key"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCredential(_))
        ));
    }

    #[test]
    fn test_no_provider_fails_validation() {
        let mut config = Config::default();
        config.providers.local.enabled = false;
        assert!(matches!(config.validate(), Err(ConfigError::NoProvider)));

        config.providers.cloud.api_key = Some(ApiKey::new(VALID_KEY));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_context_window_must_fit_history() {
        let mut config = Config::default();
        config.session.context_window = 30;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "session.context_window",
                ..
            })
        ));
    }

    #[test]
    fn test_request_timeout_covers_fallback() {
        let mut config = Config::default();
        config.providers.cloud.api_key = Some(ApiKey::new(VALID_KEY));
        assert!(config.validate().is_ok());

        config.server.request_timeout_seconds = 60;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "server.request_timeout_seconds",
                ..
            })
        ));

        config.providers.local.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_thresholds_rejected() {
        let mut config = Config::default();
        config.rate_limit.per_minute = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_debug_is_redacted() {
        let mut config = Config::default();
        config.providers.cloud.api_key = Some(ApiKey::new(VALID_KEY));
        let debug = format!("{:?}", config);
        assert!(!debug.contains(VALID_KEY));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_config_error_display() {
        let io_error = ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "test",
        ));
        assert!(io_error.to_string().contains("failed to read config file"));
        let cred = ConfigError::InvalidCredential("too short");
        assert!(!cred.to_string().contains("sk-test"));
    }
}
