//! Completion providers and model dispatch.
//!
//! - `catalog`: known models and the model → provider mapping
//! - `dispatcher`: the provider trait and the dispatcher routing to it
//! - `openai` / `anthropic`: streaming HTTP clients
//! - `sse` / `stream`: SSE framing and lazy fragment streams

pub mod anthropic;
pub mod catalog;
pub mod dispatcher;
pub mod errors;
pub mod openai;
pub mod sse;
pub mod stream;
mod wire;

pub use anthropic::AnthropicProvider;
pub use catalog::{DEFAULT_MODEL, MODEL_CATALOG, ModelInfo, ProviderKind, display_name};
pub use dispatcher::{CompletionProvider, ModelDispatcher};
pub use errors::{ProviderError, ProviderResult};
pub use openai::OpenAiProvider;
pub use stream::{Decoded, FragmentStream};
