//! Conversation persistence.
//!
//! - `types`: identifiers, conversation and message rows, timestamp helpers
//! - `errors`: the store error type
//! - `conversation_store`: the storage trait and its `SQLite` implementation
//! - `categorize`: recency grouping for conversation lists

pub mod categorize;
pub mod conversation_store;
pub mod errors;
pub mod types;

pub use categorize::{ConversationGroup, RecencyBucket, categorize};
pub use conversation_store::{ConversationStore, SqliteConversationStore};
pub use errors::{StorageError, StoreResult};
pub use types::{Conversation, ConversationId, Message, MessageId, MessageRole};
