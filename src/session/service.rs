//! Chat session handlers over the store and the dispatcher.

use chrono::{Local, NaiveDate};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::llm::{ModelDispatcher, ProviderKind};
use crate::session::errors::{SessionError, SessionResult};
use crate::store::{
    Conversation, ConversationGroup, ConversationId, ConversationStore, Message, MessageRole,
    StorageError, categorize,
};

/// Title of a conversation created implicitly by a first message.
pub const UNNAMED_TITLE: &str = "Unnamed Conversation";

/// Per-session state passed explicitly to every handler.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionContext {
    /// Conversation receiving new messages.
    pub current: Option<ConversationId>,
    /// Model chosen for new conversations.
    pub selected_model: String,
}

impl SessionContext {
    /// A fresh context with `model` selected and no conversation open.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            current: None,
            selected_model: model.into(),
        }
    }

    fn require_current(&self) -> SessionResult<ConversationId> {
        self.current.ok_or(SessionError::NoActiveConversation)
    }
}

/// Result of a completed chat turn.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TurnOutcome {
    /// Conversation the turn belongs to.
    pub conversation_id: ConversationId,
    /// Model that answered.
    pub model: String,
    /// Full assistant reply.
    pub reply: String,
}

/// Conversation handlers shared by the terminal and HTTP front-ends.
pub struct ChatService {
    store: Box<dyn ConversationStore>,
    dispatcher: ModelDispatcher,
}

impl ChatService {
    /// Create a service over a store and a dispatcher.
    #[must_use]
    pub fn new(store: Box<dyn ConversationStore>, dispatcher: ModelDispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &dyn ConversationStore {
        self.store.as_ref()
    }

    /// The model dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &ModelDispatcher {
        &self.dispatcher
    }

    /// Fetch a conversation or fail with `NotFound`.
    ///
    /// # Errors
    /// Returns an error if the conversation does not exist.
    pub fn conversation(&self, id: ConversationId) -> SessionResult<Conversation> {
        Ok(self.store.get(id)?.ok_or(StorageError::NotFound(id))?)
    }

    /// The current conversation, if any.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub fn current_conversation(&self, ctx: &SessionContext) -> SessionResult<Option<Conversation>> {
        match ctx.current {
            Some(id) => Ok(self.store.get(id)?),
            None => Ok(None),
        }
    }

    /// Messages of the current conversation.
    ///
    /// # Errors
    /// Returns an error if no conversation is open or storage access fails.
    pub fn history(&self, ctx: &SessionContext) -> SessionResult<Vec<Message>> {
        let id = ctx.require_current()?;
        Ok(self.store.get_messages(id)?)
    }

    /// Create a conversation with a custom or generated title.
    ///
    /// Generated titles read `Conversation {n} ({date})`, `n` counting the
    /// conversations created today.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub fn create_conversation(&self, title: Option<&str>, model: &str) -> SessionResult<Conversation> {
        let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(title) => title.to_string(),
            None => self.default_title(Local::now().date_naive())?,
        };
        let id = self.store.create(&title, model)?;
        info!(%id, title, model, "Created conversation");
        self.conversation(id)
    }

    /// Discard the current conversation if it is empty, then start a new one.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub fn start_new_conversation(&self, ctx: &mut SessionContext) -> SessionResult<Conversation> {
        self.discard_current_if_empty(ctx)?;
        let conversation = self.create_conversation(None, &ctx.selected_model)?;
        ctx.current = Some(conversation.id);
        Ok(conversation)
    }

    /// Make `id` current; the selected model follows the conversation.
    ///
    /// # Errors
    /// Returns [`StorageError::NotFound`] for an unknown conversation.
    pub fn open_conversation(
        &self,
        ctx: &mut SessionContext,
        id: ConversationId,
    ) -> SessionResult<Conversation> {
        let conversation = self.conversation(id)?;
        if ctx.current != Some(id) {
            self.discard_current_if_empty(ctx)?;
        }

        ctx.current = Some(id);
        if !conversation.model.trim().is_empty() {
            ctx.selected_model.clone_from(&conversation.model);
        }
        debug!(%id, model = %conversation.model, "Opened conversation");
        Ok(conversation)
    }

    /// Select the model for the session.
    ///
    /// An empty current conversation switches along; a conversation with
    /// messages keeps its model and the selection is refused.
    ///
    /// # Errors
    /// Returns [`crate::llm::ProviderError::UnknownModel`] for an unmapped
    /// model and [`StorageError::ModelLocked`] for a locked conversation.
    pub fn select_model(&self, ctx: &mut SessionContext, model: &str) -> SessionResult<()> {
        let model = model.trim();
        ProviderKind::for_model(model)?;

        if let Some(id) = ctx.current {
            self.store.update_model(id, model)?;
        }
        ctx.selected_model = model.to_string();
        debug!(model, "Selected model");
        Ok(())
    }

    /// Rename the current conversation.
    ///
    /// # Errors
    /// Returns an error if no conversation is open or storage access fails.
    pub fn rename_current(&self, ctx: &SessionContext, title: &str) -> SessionResult<()> {
        let id = ctx.require_current()?;
        self.store.rename(id, title.trim())?;
        info!(%id, title = title.trim(), "Renamed conversation");
        Ok(())
    }

    /// Delete the current conversation and clear the context.
    ///
    /// # Errors
    /// Returns an error if no conversation is open or storage access fails.
    pub fn delete_current(&self, ctx: &mut SessionContext) -> SessionResult<ConversationId> {
        let id = ctx.require_current()?;
        self.store.delete(id)?;
        ctx.current = None;
        info!(%id, "Deleted conversation");
        Ok(id)
    }

    /// Send `prompt` in the current conversation and stream the reply.
    ///
    /// Each fragment is handed to `on_fragment` as it arrives. The user
    /// message is persisted before dispatch; the reply is persisted once
    /// complete, or partially if the stream breaks after it started.
    ///
    /// # Errors
    /// Returns [`SessionError::EmptyPrompt`] for a blank prompt,
    /// [`SessionError::Provider`] if dispatch fails before streaming and
    /// [`SessionError::StreamInterrupted`] if the stream fails mid-way.
    pub fn send_message<F>(
        &self,
        ctx: &mut SessionContext,
        prompt: &str,
        on_fragment: F,
    ) -> SessionResult<TurnOutcome>
    where
        F: FnMut(&str),
    {
        if prompt.trim().is_empty() {
            return Err(SessionError::EmptyPrompt);
        }

        let existing = match ctx.current {
            Some(id) => Some(self.conversation(id)?),
            None => None,
        };
        let selected = ctx.selected_model.trim().to_string();
        let adopt_selection = match &existing {
            Some(conversation) => {
                !selected.is_empty()
                    && conversation.model != selected
                    && self.store.is_empty(conversation.id)?
            }
            None => true,
        };
        if adopt_selection {
            ProviderKind::for_model(&selected)?;
        }

        let mut conversation = match existing {
            Some(conversation) => conversation,
            None => {
                let conversation = self.create_conversation(Some(UNNAMED_TITLE), &selected)?;
                ctx.current = Some(conversation.id);
                conversation
            }
        };
        let id = conversation.id;
        if adopt_selection && conversation.model != selected {
            self.store.update_model(id, &selected)?;
            conversation.model = selected;
        }

        self.store.append_message(id, MessageRole::User, prompt)?;
        let history = self.store.get_messages(id)?;

        let stream = self
            .dispatcher
            .dispatch(&conversation.model, &history)
            .inspect_err(|err| warn!(%id, model = %conversation.model, error = %err, "Dispatch failed"))?;

        match stream.collect_with(on_fragment) {
            Ok(reply) => {
                if !reply.is_empty() {
                    self.store.append_message(id, MessageRole::Assistant, &reply)?;
                }
                debug!(%id, chars = reply.chars().count(), "Turn complete");
                Ok(TurnOutcome {
                    conversation_id: id,
                    model: conversation.model,
                    reply,
                })
            }
            Err((partial, source)) => {
                if !partial.is_empty() {
                    self.store
                        .append_message(id, MessageRole::Assistant, &partial)?;
                }
                let saved_chars = partial.chars().count();
                warn!(%id, saved_chars, error = %source, "Response stream interrupted");
                Err(SessionError::StreamInterrupted { saved_chars, source })
            }
        }
    }

    /// Discard the current conversation if it never received a message.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub fn end_session(&self, ctx: &mut SessionContext) -> SessionResult<bool> {
        self.discard_current_if_empty(ctx)
    }

    /// Discard every conversation left without messages.
    ///
    /// Front-ends without a single current conversation call this when
    /// their session ends.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub fn discard_empty_conversations(&self) -> SessionResult<usize> {
        let removed = self.store.delete_empty()?;
        if removed > 0 {
            info!(removed, "Discarded empty conversations");
        }
        Ok(removed)
    }

    /// All conversations grouped by recency relative to `today`.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub fn conversation_groups(&self, today: NaiveDate) -> SessionResult<Vec<ConversationGroup>> {
        let conversations = self.store.list()?;
        Ok(categorize(&conversations, today))
    }

    fn default_title(&self, today: NaiveDate) -> SessionResult<String> {
        let n = self.store.count_created_on(today)? + 1;
        Ok(format!("Conversation {n} ({})", today.format("%Y-%m-%d")))
    }

    fn discard_current_if_empty(&self, ctx: &mut SessionContext) -> SessionResult<bool> {
        let Some(id) = ctx.current else {
            return Ok(false);
        };
        if self.store.get(id)?.is_none() {
            ctx.current = None;
            return Ok(false);
        }

        let discarded = self.store.delete_if_empty(id)?;
        if discarded {
            ctx.current = None;
            debug!(%id, "Discarded empty conversation");
        }
        Ok(discarded)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::llm::{CompletionProvider, FragmentStream, ProviderError, ProviderResult};
    use crate::store::SqliteConversationStore;

    type Script = Vec<ProviderResult<String>>;

    struct ScriptedProvider {
        kind: ProviderKind,
        script: Script,
        seen: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    }

    impl CompletionProvider for ScriptedProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn stream(&self, model: &str, history: &[Message]) -> ProviderResult<FragmentStream> {
            self.seen.lock().unwrap().push((
                model.to_string(),
                history.iter().map(|m| m.content.clone()).collect(),
            ));
            let items: Script = self
                .script
                .iter()
                .map(|item| match item {
                    Ok(text) => Ok(text.clone()),
                    Err(_) => Err(ProviderError::MalformedPayload("scripted".to_string())),
                })
                .collect();
            Ok(FragmentStream::new(items.into_iter()))
        }
    }

    struct Harness {
        service: ChatService,
        seen: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    }

    fn harness(kind: ProviderKind, script: Script) -> Harness {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let provider = ScriptedProvider {
            kind,
            script,
            seen: Arc::clone(&seen),
        };
        let dispatcher = ModelDispatcher::new().with_provider(Box::new(provider));
        let store = SqliteConversationStore::open_in_memory().unwrap();
        Harness {
            service: ChatService::new(Box::new(store), dispatcher),
            seen,
        }
    }

    fn ok(parts: &[&str]) -> Script {
        parts.iter().map(|p| Ok((*p).to_string())).collect()
    }

    #[test]
    fn test_first_message_creates_unnamed_conversation() {
        let h = harness(ProviderKind::OpenAi, ok(&["Hel", "lo"]));
        let mut ctx = SessionContext::new("gpt-3.5-turbo");
        let mut relayed = Vec::new();

        let outcome = h
            .service
            .send_message(&mut ctx, "hi", |f| relayed.push(f.to_string()))
            .unwrap();

        assert_eq!(outcome.reply, "Hello");
        assert_eq!(relayed, vec!["Hel".to_string(), "lo".to_string()]);
        let id = ctx.current.unwrap();
        let conversation = h.service.conversation(id).unwrap();
        assert_eq!(conversation.title, UNNAMED_TITLE);
        assert_eq!(conversation.model, "gpt-3.5-turbo");

        let messages = h.service.history(&ctx).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "Hello");
    }

    #[test]
    fn test_history_is_sent_once_to_stored_model() {
        let h = harness(ProviderKind::OpenAi, ok(&["ok"]));
        let mut ctx = SessionContext::new("gpt-4");
        h.service.send_message(&mut ctx, "first", |_| {}).unwrap();
        h.service.send_message(&mut ctx, "second", |_| {}).unwrap();

        let seen = h.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].0, "gpt-4");
        assert_eq!(
            seen[1].1,
            vec!["first".to_string(), "ok".to_string(), "second".to_string()]
        );
    }

    #[test]
    fn test_unknown_model_leaves_only_user_message() {
        let h = harness(ProviderKind::OpenAi, ok(&["never"]));
        let id = h.service.store().create("Legacy", "mistral-large").unwrap();
        h.service
            .store()
            .append_message(id, MessageRole::User, "earlier")
            .unwrap();
        let mut ctx = SessionContext {
            current: Some(id),
            selected_model: "gpt-4".to_string(),
        };

        let err = h.service.send_message(&mut ctx, "hi", |_| {}).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Provider(ProviderError::UnknownModel(_))
        ));

        let messages = h.service.history(&ctx).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "hi");
        assert_eq!(h.service.conversation(id).unwrap().model, "mistral-large");
        assert!(h.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_selection_keeps_empty_conversation_model() {
        let h = harness(ProviderKind::OpenAi, ok(&["never"]));
        let id = h.service.store().create("Draft", "gpt-4").unwrap();
        let mut ctx = SessionContext {
            current: Some(id),
            selected_model: "mistral-large".to_string(),
        };

        let err = h.service.send_message(&mut ctx, "hi", |_| {}).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Provider(ProviderError::UnknownModel(_))
        ));
        assert_eq!(h.service.conversation(id).unwrap().model, "gpt-4");
        assert!(h.service.store().is_empty(id).unwrap());
        assert!(h.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_selection_creates_nothing() {
        let h = harness(ProviderKind::OpenAi, ok(&["never"]));
        let mut ctx = SessionContext::new("mistral-large");

        let err = h.service.send_message(&mut ctx, "hi", |_| {}).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Provider(ProviderError::UnknownModel(_))
        ));
        assert!(ctx.current.is_none());
        assert!(h.service.store().list().unwrap().is_empty());
    }

    #[test]
    fn test_partial_reply_is_persisted_on_interruption() {
        let h = harness(
            ProviderKind::Anthropic,
            vec![
                Ok("Par".to_string()),
                Ok("tial".to_string()),
                Err(ProviderError::MalformedPayload("x".to_string())),
            ],
        );
        let mut ctx = SessionContext::new("claude-3-sonnet-20240229");

        let err = h.service.send_message(&mut ctx, "hi", |_| {}).unwrap_err();
        assert!(matches!(
            err,
            SessionError::StreamInterrupted { saved_chars: 7, .. }
        ));
        let messages = h.service.history(&ctx).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "Partial");
    }

    #[test]
    fn test_interruption_without_text_persists_nothing_more() {
        let h = harness(
            ProviderKind::OpenAi,
            vec![Err(ProviderError::MalformedPayload("x".to_string()))],
        );
        let mut ctx = SessionContext::new("gpt-4");
        let err = h.service.send_message(&mut ctx, "hi", |_| {}).unwrap_err();
        assert!(matches!(
            err,
            SessionError::StreamInterrupted { saved_chars: 0, .. }
        ));
        assert_eq!(h.service.history(&ctx).unwrap().len(), 1);
    }

    #[test]
    fn test_blank_prompt_is_rejected_without_side_effects() {
        let h = harness(ProviderKind::OpenAi, ok(&["x"]));
        let mut ctx = SessionContext::new("gpt-4");
        let err = h.service.send_message(&mut ctx, "   ", |_| {}).unwrap_err();
        assert!(matches!(err, SessionError::EmptyPrompt));
        assert!(ctx.current.is_none());
        assert!(h.service.store().list().unwrap().is_empty());
    }

    #[test]
    fn test_default_titles_count_todays_conversations() {
        let h = harness(ProviderKind::OpenAi, ok(&["x"]));
        let mut ctx = SessionContext::new("gpt-4");
        let today = Local::now().date_naive().format("%Y-%m-%d").to_string();

        let first = h.service.start_new_conversation(&mut ctx).unwrap();
        assert_eq!(first.title, format!("Conversation 1 ({today})"));
        h.service.send_message(&mut ctx, "keep me", |_| {}).unwrap();

        let second = h.service.start_new_conversation(&mut ctx).unwrap();
        assert_eq!(second.title, format!("Conversation 2 ({today})"));
        assert_eq!(second.model, "gpt-4");
    }

    #[test]
    fn test_empty_conversation_discarded_on_switch() {
        let h = harness(ProviderKind::OpenAi, ok(&["x"]));
        let mut ctx = SessionContext::new("gpt-4");

        let kept = h.service.start_new_conversation(&mut ctx).unwrap();
        h.service.send_message(&mut ctx, "hello", |_| {}).unwrap();
        let empty = h.service.start_new_conversation(&mut ctx).unwrap();

        h.service.open_conversation(&mut ctx, kept.id).unwrap();
        assert_eq!(ctx.current, Some(kept.id));
        assert!(h.service.store().get(empty.id).unwrap().is_none());

        h.service.open_conversation(&mut ctx, kept.id).unwrap();
        assert!(h.service.store().get(kept.id).unwrap().is_some());
    }

    #[test]
    fn test_open_follows_conversation_model() {
        let h = harness(ProviderKind::OpenAi, ok(&["x"]));
        let id = h
            .service
            .store()
            .create("Old", "claude-3-sonnet-20240229")
            .unwrap();
        let mut ctx = SessionContext::new("gpt-4");
        h.service.open_conversation(&mut ctx, id).unwrap();
        assert_eq!(ctx.selected_model, "claude-3-sonnet-20240229");

        let err = h
            .service
            .open_conversation(&mut ctx, ConversationId(999))
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Storage(StorageError::NotFound(_))
        ));
        assert_eq!(ctx.current, Some(id));
    }

    #[test]
    fn test_select_model_updates_empty_conversation_only() {
        let h = harness(ProviderKind::OpenAi, ok(&["x"]));
        let mut ctx = SessionContext::new("gpt-3.5-turbo");
        let conversation = h.service.start_new_conversation(&mut ctx).unwrap();

        h.service.select_model(&mut ctx, "gpt-4").unwrap();
        assert_eq!(h.service.conversation(conversation.id).unwrap().model, "gpt-4");

        h.service.send_message(&mut ctx, "hi", |_| {}).unwrap();
        let err = h
            .service
            .select_model(&mut ctx, "claude-3-sonnet-20240229")
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Storage(StorageError::ModelLocked { .. })
        ));
        assert_eq!(ctx.selected_model, "gpt-4");

        let err = h.service.select_model(&mut ctx, "llama").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Provider(ProviderError::UnknownModel(_))
        ));
    }

    #[test]
    fn test_send_aligns_empty_conversation_with_selection() {
        let h = harness(ProviderKind::OpenAi, ok(&["x"]));
        let id = h.service.store().create("Draft", "gpt-3.5-turbo").unwrap();
        let mut ctx = SessionContext {
            current: Some(id),
            selected_model: "gpt-4".to_string(),
        };
        let outcome = h.service.send_message(&mut ctx, "hi", |_| {}).unwrap();
        assert_eq!(outcome.model, "gpt-4");
        assert_eq!(h.service.conversation(id).unwrap().model, "gpt-4");
    }

    #[test]
    fn test_rename_and_delete_require_current() {
        let h = harness(ProviderKind::OpenAi, ok(&["x"]));
        let mut ctx = SessionContext::new("gpt-4");
        assert!(matches!(
            h.service.rename_current(&ctx, "x"),
            Err(SessionError::NoActiveConversation)
        ));
        assert!(matches!(
            h.service.delete_current(&mut ctx),
            Err(SessionError::NoActiveConversation)
        ));

        let conversation = h.service.start_new_conversation(&mut ctx).unwrap();
        h.service.rename_current(&ctx, "  Trip plans ").unwrap();
        assert_eq!(
            h.service.conversation(conversation.id).unwrap().title,
            "Trip plans"
        );

        h.service.delete_current(&mut ctx).unwrap();
        assert!(ctx.current.is_none());
        assert!(h.service.store().get(conversation.id).unwrap().is_none());
    }

    #[test]
    fn test_end_session_discards_empty_conversation() {
        let h = harness(ProviderKind::OpenAi, ok(&["x"]));
        let mut ctx = SessionContext::new("gpt-4");
        h.service.start_new_conversation(&mut ctx).unwrap();
        assert!(h.service.end_session(&mut ctx).unwrap());
        assert!(h.service.store().list().unwrap().is_empty());
        assert!(!h.service.end_session(&mut ctx).unwrap());
    }

    #[test]
    fn test_discard_empty_conversations_keeps_answered_ones() {
        let h = harness(ProviderKind::OpenAi, ok(&["x"]));
        h.service.create_conversation(Some("Idle"), "gpt-4").unwrap();
        let kept = h.service.create_conversation(Some("Kept"), "gpt-4").unwrap();
        h.service
            .store()
            .append_message(kept.id, MessageRole::User, "hello")
            .unwrap();

        assert_eq!(h.service.discard_empty_conversations().unwrap(), 1);
        let remaining = h.service.store().list().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, kept.id);
    }

    #[test]
    fn test_conversation_groups() {
        let h = harness(ProviderKind::OpenAi, ok(&["x"]));
        h.service.create_conversation(Some("A"), "gpt-4").unwrap();
        h.service.create_conversation(Some("B"), "gpt-4").unwrap();
        let groups = h
            .service
            .conversation_groups(Local::now().date_naive())
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].label, "Today");
        assert_eq!(groups[0].conversations[0].title, "B");
    }
}
