//! Wire helpers shared by the provider clients.

use reqwest::blocking::Response;
use serde::Serialize;
use serde_json::Value;

use crate::llm::catalog::ProviderKind;
use crate::llm::errors::{ProviderError, ProviderResult};
use crate::store::Message;

/// Longest error body echoed back to the user.
const MAX_ERROR_BODY_CHARS: usize = 300;

/// A `{role, content}` message as both providers accept it.
#[derive(Debug, Serialize)]
pub struct WireMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            role: message.role.as_str(),
            content: &message.content,
        }
    }
}

/// Join a base URL and an endpoint path.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// Pull a human-readable message out of an error payload.
///
/// Handles `{"error": {"message": ..}}`, `{"error": ".."}` and
/// `{"message": ..}` shapes.
pub fn error_message(value: &Value) -> Option<String> {
    value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| value.get("error").and_then(Value::as_str).map(str::to_owned))
        .or_else(|| value.get("message").and_then(Value::as_str).map(str::to_owned))
}

/// Parse a streamed JSON payload.
pub fn parse_payload(payload: &str) -> ProviderResult<Value> {
    serde_json::from_str(payload)
        .map_err(|err| ProviderError::MalformedPayload(format!("{err}: {}", truncate(payload))))
}

/// Turn a non-success response into [`ProviderError::Status`].
pub fn ensure_success(provider: ProviderKind, response: Response) -> ProviderResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .as_ref()
        .and_then(error_message)
        .unwrap_or_else(|| truncate(&body));

    Err(ProviderError::Status {
        provider,
        status: status.as_u16(),
        message,
    })
}

fn truncate(text: &str) -> String {
    let mut out: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
    if text.chars().count() > MAX_ERROR_BODY_CHARS {
        out.push('…');
    }
    out
}
