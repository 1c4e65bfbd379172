//! Error types for the conversation store.

use thiserror::Error;

use crate::store::types::ConversationId;

/// Conversation store error type.
#[derive(Debug, Error)]
pub enum StorageError {
    /// `SQLite` access or schema error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The conversation does not exist.
    #[error("conversation {0} not found")]
    NotFound(ConversationId),
    /// The conversation already owns messages, so its model is fixed.
    #[error("conversation {id} already uses {model}; start a new conversation to switch models")]
    ModelLocked {
        /// Conversation whose model was to be changed.
        id: ConversationId,
        /// Model the conversation is bound to.
        model: String,
    },
    /// A stored role value is not recognised.
    #[error("invalid message role: {0}")]
    InvalidRole(String),
}

/// Convenience result alias for store operations.
pub type StoreResult<T> = Result<T, StorageError>;
