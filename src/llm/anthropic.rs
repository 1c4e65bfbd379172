//! Anthropic messages streaming client.

use std::io::BufReader;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ApiKey;
use crate::llm::catalog::ProviderKind;
use crate::llm::dispatcher::CompletionProvider;
use crate::llm::errors::{ProviderError, ProviderResult};
use crate::llm::sse::SseEvent;
use crate::llm::stream::{Decoded, FragmentStream};
use crate::llm::wire::{self, WireMessage};
use crate::store::Message;

/// API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: BlockDelta },
    MessageStop,
    Error { error: ErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

/// Streaming client for the Anthropic messages endpoint.
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: ApiKey,
    max_tokens: u32,
}

impl AnthropicProvider {
    /// Create a provider sharing an existing HTTP client.
    #[must_use]
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: ApiKey,
        max_tokens: u32,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            max_tokens,
        }
    }
}

impl CompletionProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn stream(&self, model: &str, history: &[Message]) -> ProviderResult<FragmentStream> {
        let request = MessagesRequest {
            model,
            max_tokens: self.max_tokens,
            messages: history.iter().map(WireMessage::from).collect(),
            stream: true,
        };

        let url = wire::endpoint(&self.base_url, "messages");
        debug!(model, messages = history.len(), "Requesting Anthropic message stream");
        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()?;
        let response = wire::ensure_success(ProviderKind::Anthropic, response)?;

        Ok(FragmentStream::from_sse(BufReader::new(response), decode_event))
    }
}

/// Decode one Anthropic SSE event.
///
/// # Errors
/// Returns an error for malformed payloads and `error` events.
pub fn decode_event(event: &SseEvent) -> ProviderResult<Decoded> {
    let payload = event.data.trim();
    if payload.is_empty() {
        return Ok(Decoded::Skip);
    }

    let value = wire::parse_payload(payload)?;
    let parsed: StreamEvent = serde_json::from_value(value)
        .map_err(|err| ProviderError::MalformedPayload(err.to_string()))?;

    match parsed {
        StreamEvent::ContentBlockDelta {
            delta: BlockDelta::TextDelta { text },
        } if !text.is_empty() => Ok(Decoded::Text(text)),
        StreamEvent::MessageStop => Ok(Decoded::Done),
        StreamEvent::Error { error } => {
            let message = if error.message.is_empty() {
                error.kind
            } else {
                error.message
            };
            Err(ProviderError::Api {
                provider: ProviderKind::Anthropic,
                message,
            })
        }
        StreamEvent::ContentBlockDelta { .. } | StreamEvent::Other => Ok(Decoded::Skip),
    }
}
