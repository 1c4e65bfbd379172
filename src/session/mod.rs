//! Chat session handlers.
//!
//! State lives in an explicit [`SessionContext`] handed to each
//! [`ChatService`] handler, so the terminal and HTTP front-ends share them.

pub mod errors;
pub mod service;

pub use errors::{SessionError, SessionResult};
pub use service::{ChatService, SessionContext, TurnOutcome, UNNAMED_TITLE};
