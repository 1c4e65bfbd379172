//! Routing of a model identifier to the provider serving it.

use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, info};

use crate::config::ProviderConfig;
use crate::llm::anthropic::AnthropicProvider;
use crate::llm::catalog::ProviderKind;
use crate::llm::errors::{ProviderError, ProviderResult};
use crate::llm::openai::OpenAiProvider;
use crate::llm::stream::FragmentStream;
use crate::store::Message;

/// A completion API able to stream a reply to a message history.
pub trait CompletionProvider: Send + Sync {
    /// Which provider this is.
    fn kind(&self) -> ProviderKind;

    /// Start streaming the reply to `history` from `model`.
    ///
    /// # Errors
    /// Returns an error if the request cannot be sent or is refused.
    fn stream(&self, model: &str, history: &[Message]) -> ProviderResult<FragmentStream>;
}

/// Picks the provider for a model and forwards the history to it.
///
/// A provider slot stays empty when its credential is not configured; a
/// dispatch to it then fails with [`ProviderError::MissingCredential`].
#[derive(Default)]
pub struct ModelDispatcher {
    openai: Option<Box<dyn CompletionProvider>>,
    anthropic: Option<Box<dyn CompletionProvider>>,
}

impl ModelDispatcher {
    /// A dispatcher with no provider configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the HTTP providers whose credentials are configured.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &ProviderConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut dispatcher = Self::new();
        if let Some(key) = &config.openai.api_key {
            dispatcher = dispatcher.with_provider(Box::new(OpenAiProvider::new(
                client.clone(),
                config.openai.base_url.clone(),
                key.clone(),
            )));
        }
        if let Some(key) = &config.anthropic.api_key {
            dispatcher = dispatcher.with_provider(Box::new(AnthropicProvider::new(
                client,
                config.anthropic.base_url.clone(),
                key.clone(),
                config.anthropic.max_tokens,
            )));
        }

        info!(
            openai = dispatcher.has_provider(ProviderKind::OpenAi),
            anthropic = dispatcher.has_provider(ProviderKind::Anthropic),
            "Model dispatcher ready"
        );
        Ok(dispatcher)
    }

    /// Install a provider, replacing any provider of the same kind.
    #[must_use]
    pub fn with_provider(mut self, provider: Box<dyn CompletionProvider>) -> Self {
        match provider.kind() {
            ProviderKind::OpenAi => self.openai = Some(provider),
            ProviderKind::Anthropic => self.anthropic = Some(provider),
        }
        self
    }

    /// Whether a provider of `kind` is installed.
    #[must_use]
    pub const fn has_provider(&self, kind: ProviderKind) -> bool {
        match kind {
            ProviderKind::OpenAi => self.openai.is_some(),
            ProviderKind::Anthropic => self.anthropic.is_some(),
        }
    }

    /// Stream the reply of `model` to `history`.
    ///
    /// # Errors
    /// Returns an error if the model maps to no provider, the provider has
    /// no credential, or the request fails before streaming starts.
    pub fn dispatch(&self, model: &str, history: &[Message]) -> ProviderResult<FragmentStream> {
        let kind = ProviderKind::for_model(model)?;
        let provider = match kind {
            ProviderKind::OpenAi => self.openai.as_deref(),
            ProviderKind::Anthropic => self.anthropic.as_deref(),
        }
        .ok_or(ProviderError::MissingCredential {
            provider: kind,
            env_var: kind.credential_env(),
        })?;

        debug!(model, provider = %kind, "Dispatching message history");
        provider.stream(model.trim(), history)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::ParleyConfig;
    use crate::store::{ConversationId, MessageId, MessageRole};

    struct FakeProvider {
        kind: ProviderKind,
        calls: Arc<Mutex<Vec<(String, usize)>>>,
    }

    impl CompletionProvider for FakeProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn stream(&self, model: &str, history: &[Message]) -> ProviderResult<FragmentStream> {
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), history.len()));
            let reply = format!("{} says hi", self.kind);
            Ok(FragmentStream::new(std::iter::once(Ok(reply))))
        }
    }

    fn fake(kind: ProviderKind) -> (Box<dyn CompletionProvider>, Arc<Mutex<Vec<(String, usize)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let provider = FakeProvider {
            kind,
            calls: Arc::clone(&calls),
        };
        (Box::new(provider), calls)
    }

    fn history() -> Vec<Message> {
        vec![Message {
            id: MessageId(1),
            conversation_id: ConversationId(1),
            role: MessageRole::User,
            content: "hello".to_string(),
            timestamp: String::new(),
        }]
    }

    #[test]
    fn test_routes_by_model_family() {
        let (openai, openai_calls) = fake(ProviderKind::OpenAi);
        let (anthropic, anthropic_calls) = fake(ProviderKind::Anthropic);
        let dispatcher = ModelDispatcher::new()
            .with_provider(openai)
            .with_provider(anthropic);

        let text = dispatcher
            .dispatch("gpt-4", &history())
            .unwrap()
            .collect_with(|_| {})
            .unwrap();
        assert_eq!(text, "OpenAI says hi");

        let text = dispatcher
            .dispatch("claude-3-sonnet-20240229", &history())
            .unwrap()
            .collect_with(|_| {})
            .unwrap();
        assert_eq!(text, "Anthropic says hi");

        assert_eq!(openai_calls.lock().unwrap().as_slice(), &[("gpt-4".to_string(), 1)]);
        assert_eq!(
            anthropic_calls.lock().unwrap().as_slice(),
            &[("claude-3-sonnet-20240229".to_string(), 1)]
        );
    }

    #[test]
    fn test_unknown_model() {
        let (openai, calls) = fake(ProviderKind::OpenAi);
        let dispatcher = ModelDispatcher::new().with_provider(openai);
        let err = dispatcher.dispatch("llama-3-70b", &history()).err().unwrap();
        assert!(matches!(err, ProviderError::UnknownModel(model) if model == "llama-3-70b"));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_credential() {
        let (openai, _) = fake(ProviderKind::OpenAi);
        let dispatcher = ModelDispatcher::new().with_provider(openai);
        let err = dispatcher.dispatch("claude-3-opus-20240229", &history()).err().unwrap();
        assert!(matches!(
            err,
            ProviderError::MissingCredential {
                provider: ProviderKind::Anthropic,
                env_var: "ANTHROPIC_API_KEY"
            }
        ));
    }

    #[test]
    fn test_from_config_installs_configured_providers_only() {
        let config = ParleyConfig::default().with_anthropic_key("sk-ant-test");
        let dispatcher = ModelDispatcher::from_config(&config.providers).unwrap();
        assert!(dispatcher.has_provider(ProviderKind::Anthropic));
        assert!(!dispatcher.has_provider(ProviderKind::OpenAi));
    }
}
