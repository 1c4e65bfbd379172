//! Known models and the mapping from model identifier to provider.

use std::fmt;

use serde::Serialize;

use crate::llm::errors::{ProviderError, ProviderResult};

/// Model selected when nothing else is configured.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Label shown for a conversation without a model.
const NO_MODEL_LABEL: &str = "No Model";

/// The closed set of supported completion providers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions.
    OpenAi,
    /// Anthropic messages.
    Anthropic,
}

impl ProviderKind {
    /// Human-readable provider name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Anthropic => "Anthropic",
        }
    }

    /// Environment variable carrying the provider credential.
    #[must_use]
    pub const fn credential_env(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    /// Resolve the provider serving `model`.
    ///
    /// Catalogued models map explicitly; other identifiers fall back to the
    /// family prefix table.
    ///
    /// # Errors
    /// Returns [`ProviderError::UnknownModel`] if no provider matches.
    pub fn for_model(model: &str) -> ProviderResult<Self> {
        let model = model.trim();
        if let Some(info) = lookup(model) {
            return Ok(info.provider);
        }

        PREFIX_RULES
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix))
            .map(|(_, kind)| *kind)
            .ok_or_else(|| ProviderError::UnknownModel(model.to_string()))
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A selectable model.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct ModelInfo {
    /// Identifier sent to the provider and stored on the conversation.
    pub id: &'static str,
    /// Name shown to the user.
    pub display_name: &'static str,
    /// Provider serving the model.
    pub provider: ProviderKind,
}

/// Models offered for selection, in display order.
pub const MODEL_CATALOG: &[ModelInfo] = &[
    ModelInfo {
        id: "gpt-3.5-turbo",
        display_name: "GPT-3.5 Turbo",
        provider: ProviderKind::OpenAi,
    },
    ModelInfo {
        id: "gpt-4",
        display_name: "GPT-4",
        provider: ProviderKind::OpenAi,
    },
    ModelInfo {
        id: "claude-3-sonnet-20240229",
        display_name: "Claude 3 Sonnet",
        provider: ProviderKind::Anthropic,
    },
];

/// Model families accepted beyond the catalog.
const PREFIX_RULES: &[(&str, ProviderKind)] = &[
    ("gpt-", ProviderKind::OpenAi),
    ("o1", ProviderKind::OpenAi),
    ("o3", ProviderKind::OpenAi),
    ("claude-", ProviderKind::Anthropic),
];

/// Look up a catalogued model.
#[must_use]
pub fn lookup(model: &str) -> Option<&'static ModelInfo> {
    MODEL_CATALOG.iter().find(|info| info.id == model)
}

/// Display name for a model identifier.
#[must_use]
pub fn display_name(model: &str) -> &str {
    if model.trim().is_empty() {
        return NO_MODEL_LABEL;
    }
    lookup(model).map_or(model, |info| info.display_name)
}
