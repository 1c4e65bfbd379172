//! Error types for provider dispatch and streaming.

use thiserror::Error;

use crate::llm::catalog::ProviderKind;

/// Errors produced while dispatching to a provider or reading its stream.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The model identifier maps to no known provider.
    #[error("no provider serves model `{0}`")]
    UnknownModel(String),
    /// The provider's credential was not configured.
    #[error("{provider} credential missing: set {env_var}")]
    MissingCredential {
        /// Provider that needs the credential.
        provider: ProviderKind,
        /// Environment variable holding it.
        env_var: &'static str,
    },
    /// HTTP client error.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The provider answered with a non-success status.
    #[error("{provider} returned HTTP {status}: {message}")]
    Status {
        /// Provider that answered.
        provider: ProviderKind,
        /// HTTP status code.
        status: u16,
        /// Error message or (truncated) body.
        message: String,
    },
    /// Reading the response stream failed.
    #[error("stream read failed: {0}")]
    Io(#[from] std::io::Error),
    /// A streamed payload could not be decoded.
    #[error("malformed streamed payload: {0}")]
    MalformedPayload(String),
    /// The provider reported an error inside the stream.
    #[error("{provider} error: {message}")]
    Api {
        /// Provider that reported the error.
        provider: ProviderKind,
        /// Error message.
        message: String,
    },
}

impl ProviderError {
    /// Whether trying again later may succeed (overload, network hiccup).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Io(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Convenience result alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;
