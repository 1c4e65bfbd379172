//! Application state shared across all request handlers.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::session::ChatService;

/// Shared application state.
pub struct AppState {
    /// Chat handlers; one action runs at a time.
    pub service: Arc<Mutex<ChatService>>,
    /// Model used when a request names none.
    pub default_model: String,
}

impl AppState {
    /// Wrap a chat service for the router.
    #[must_use]
    pub fn new(service: ChatService, default_model: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            service: Arc::new(Mutex::new(service)),
            default_model: default_model.into(),
        })
    }
}
