//! Runtime configuration.
//!
//! Defaults are overlaid with environment variables once at startup, then
//! checked with [`ParleyConfig::validate`] before anything else runs.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::llm::catalog::{DEFAULT_MODEL, ProviderKind};

/// OpenAI credential.
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
/// Anthropic credential.
pub const ENV_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
/// `SQLite` database file.
pub const ENV_DB_PATH: &str = "PARLEY_DB_PATH";
/// Default selected model.
pub const ENV_MODEL: &str = "PARLEY_MODEL";
/// OpenAI API base URL.
pub const ENV_OPENAI_URL: &str = "PARLEY_OPENAI_URL";
/// Anthropic API base URL.
pub const ENV_ANTHROPIC_URL: &str = "PARLEY_ANTHROPIC_URL";
/// Anthropic `max_tokens`.
pub const ENV_MAX_TOKENS: &str = "PARLEY_MAX_TOKENS";
/// HTTP server port.
pub const ENV_PORT: &str = "PARLEY_PORT";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is out of range or unparsable.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// A base URL does not parse.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    /// The default model's provider has no credential.
    #[error("{provider} credential missing: set {env_var}")]
    MissingCredential {
        /// Provider serving the default model.
        provider: ProviderKind,
        /// Environment variable to set.
        env_var: &'static str,
    },
}

/// Convenience result alias for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// A provider credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a credential; blank values count as absent.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// The raw secret, for request headers only.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParleyConfig {
    /// Model selected when a session starts.
    pub default_model: String,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Provider settings.
    pub providers: ProviderConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            storage: StorageConfig::default(),
            providers: ProviderConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl ParleyConfig {
    /// Defaults overlaid with the process environment.
    ///
    /// # Errors
    /// Returns an error if a numeric variable does not parse.
    pub fn from_env() -> ConfigResult<Self> {
        Self::default().with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Overlay variables returned by `lookup` onto this configuration.
    ///
    /// # Errors
    /// Returns an error if a numeric variable does not parse.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(key) = lookup(ENV_OPENAI_API_KEY) {
            self.providers.openai.api_key = ApiKey::new(key);
        }
        if let Some(key) = lookup(ENV_ANTHROPIC_API_KEY) {
            self.providers.anthropic.api_key = ApiKey::new(key);
        }
        if let Some(path) = var(ENV_DB_PATH) {
            self.storage.sqlite_path = PathBuf::from(path);
        }
        if let Some(model) = var(ENV_MODEL) {
            self.default_model = model.trim().to_string();
        }
        if let Some(url) = var(ENV_OPENAI_URL) {
            self.providers.openai.base_url = url.trim().to_string();
        }
        if let Some(url) = var(ENV_ANTHROPIC_URL) {
            self.providers.anthropic.base_url = url.trim().to_string();
        }
        if let Some(raw) = var(ENV_MAX_TOKENS) {
            self.providers.anthropic.max_tokens = parse_number(ENV_MAX_TOKENS, &raw)?;
        }
        if let Some(raw) = var(ENV_PORT) {
            self.server.port = parse_number(ENV_PORT, &raw)?;
        }

        Ok(self)
    }

    /// Set the default model.
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Set the database file.
    #[must_use]
    pub fn with_sqlite_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.sqlite_path = path.into();
        self
    }

    /// Set the OpenAI credential.
    #[must_use]
    pub fn with_openai_key(mut self, key: impl Into<String>) -> Self {
        self.providers.openai.api_key = ApiKey::new(key);
        self
    }

    /// Set the Anthropic credential.
    #[must_use]
    pub fn with_anthropic_key(mut self, key: impl Into<String>) -> Self {
        self.providers.anthropic.api_key = ApiKey::new(key);
        self
    }

    /// Set the HTTP server port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.server.port = port;
        self
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid, or if the
    /// default model's provider has no credential.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.providers.anthropic.max_tokens == 0 {
            return Err(ConfigError::InvalidConfig(
                "providers.anthropic.max_tokens must be > 0".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "server.port must be > 0".to_string(),
            ));
        }

        if self.providers.request_timeout_secs == 0 || self.providers.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "provider timeouts must be > 0".to_string(),
            ));
        }

        if self.storage.sqlite_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "storage.sqlite_path must not be empty".to_string(),
            ));
        }

        Url::parse(&self.providers.openai.base_url)?;
        Url::parse(&self.providers.anthropic.base_url)?;

        let provider = ProviderKind::for_model(&self.default_model).map_err(|_| {
            ConfigError::InvalidConfig(format!(
                "default model `{}` maps to no provider",
                self.default_model
            ))
        })?;
        if !self.providers.has_credential(provider) {
            return Err(ConfigError::MissingCredential {
                provider,
                env_var: provider.credential_env(),
            });
        }

        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> ConfigResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidConfig(format!("{name} must be a positive integer, got `{raw}`")))
}

/// Storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the `SQLite` database file.
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("conversations.db"),
        }
    }
}

/// Completion provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// OpenAI settings.
    pub openai: OpenAiConfig,
    /// Anthropic settings.
    pub anthropic: AnthropicConfig,
    /// TCP connect timeout.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout, streaming included.
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            openai: OpenAiConfig::default(),
            anthropic: AnthropicConfig::default(),
            connect_timeout_secs: 10,
            request_timeout_secs: 300,
        }
    }
}

impl ProviderConfig {
    /// Whether a credential is configured for `provider`.
    #[must_use]
    pub const fn has_credential(&self, provider: ProviderKind) -> bool {
        match provider {
            ProviderKind::OpenAi => self.openai.api_key.is_some(),
            ProviderKind::Anthropic => self.anthropic.api_key.is_some(),
        }
    }
}

/// OpenAI settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// API base URL.
    pub base_url: String,
    /// Credential.
    #[serde(skip)]
    pub api_key: Option<ApiKey>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
        }
    }
}

/// Anthropic settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// API base URL.
    pub base_url: String,
    /// Credential.
    #[serde(skip)]
    pub api_key: Option<ApiKey>,
    /// Maximum tokens per response.
    pub max_tokens: u32,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com/v1".to_string(),
            api_key: None,
            max_tokens: 1024,
        }
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}
