//! OpenAI chat-completions streaming client.

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

/// Terminal marker of an OpenAI stream.
const DONE_MARKER: &str = "[DONE]";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// Streaming client for the OpenAI chat-completions endpoint.
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: ApiKey,
}

impl OpenAiProvider {
    /// Create a provider sharing an existing HTTP client.
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }
}

impl CompletionProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn stream(&self, model: &str, history: &[Message]) -> ProviderResult<FragmentStream> {
        let request = ChatRequest {
            model,
            messages: history.iter().map(WireMessage::from).collect(),
            stream: true,
        };

        let url = wire::endpoint(&self.base_url, "chat/completions");
        debug!(model, messages = history.len(), "Requesting OpenAI completion stream");
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()?;
        let response = wire::ensure_success(ProviderKind::OpenAi, response)?;

        Ok(FragmentStream::from_sse(BufReader::new(response), decode_event))
    }
}

/// Decode one OpenAI SSE event.
///
/// # Errors
/// Returns an error for malformed payloads and in-stream API errors.
pub fn decode_event(event: &SseEvent) -> ProviderResult<Decoded> {
    let payload = event.data.trim();
    if payload.is_empty() {
        return Ok(Decoded::Skip);
    }
    if payload == DONE_MARKER {
        return Ok(Decoded::Done);
    }

    let value = wire::parse_payload(payload)?;
    if value.get("error").is_some() {
        let message = wire::error_message(&value).unwrap_or_else(|| "unknown error".to_string());
        return Err(ProviderError::Api {
            provider: ProviderKind::OpenAi,
            message,
        });
    }

    let chunk: ChatChunk = serde_json::from_value(value)
        .map_err(|err| ProviderError::MalformedPayload(err.to_string()))?;
    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content);

    Ok(match content {
        Some(text) if !text.is_empty() => Decoded::Text(text),
        _ => Decoded::Skip,
    })
}
