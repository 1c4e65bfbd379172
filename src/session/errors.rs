//! Error type for chat session handlers.

use thiserror::Error;

use crate::llm::ProviderError;
use crate::store::StorageError;

/// Failures surfaced to the user by a session handler. None is fatal.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Conversation store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Provider failure before any fragment was received.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The handler needs a current conversation.
    #[error("no active conversation")]
    NoActiveConversation,
    /// The prompt is blank.
    #[error("message is empty")]
    EmptyPrompt,
    /// The stream failed after it started.
    #[error("response interrupted after {saved_chars} characters: {source}")]
    StreamInterrupted {
        /// Characters of partial reply that were persisted.
        saved_chars: usize,
        /// Underlying provider failure.
        #[source]
        source: ProviderError,
    },
}

impl SessionError {
    /// Whether retrying the same action may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Provider(err) | Self::StreamInterrupted { source: err, .. } => err.is_transient(),
            _ => false,
        }
    }
}

/// Convenience result alias for session handlers.
pub type SessionResult<T> = Result<T, SessionError>;
