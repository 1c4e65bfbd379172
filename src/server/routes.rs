//! HTTP route handlers for the conversation API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Local;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::llm::{MODEL_CATALOG, ProviderError, ProviderKind};
use crate::session::{ChatService, SessionContext, SessionError, SessionResult};
use crate::store::{
    Conversation, ConversationGroup, ConversationId, Message, StorageError,
};

use super::state::AppState;

/// Error body returned by failing handlers.
type ApiError = (StatusCode, String);

/// Buffered SSE events per streaming response.
const EVENT_BUFFER: usize = 64;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/models", get(list_models))
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/api/conversations/{id}",
            get(get_conversation)
                .patch(update_conversation)
                .delete(delete_conversation),
        )
        .route("/api/conversations/{id}/messages", post(send_message))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "parley",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// HTTP status for a session failure.
fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
        SessionError::Storage(StorageError::ModelLocked { .. }) => StatusCode::CONFLICT,
        SessionError::Provider(ProviderError::UnknownModel(_))
        | SessionError::EmptyPrompt
        | SessionError::NoActiveConversation => StatusCode::BAD_REQUEST,
        SessionError::Provider(ProviderError::MissingCredential { .. }) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SessionError::Provider(_) | SessionError::StreamInterrupted { .. } => StatusCode::BAD_GATEWAY,
        SessionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: SessionError) -> ApiError {
    (status_for(&err), err.to_string())
}

fn check_model(model: &str) -> Result<(), ApiError> {
    ProviderKind::for_model(model)
        .map(|_| ())
        .map_err(|err| api_error(err.into()))
}

/// Run `action` on the blocking pool while holding the service lock.
async fn with_service<T, F>(state: &AppState, action: F) -> Result<T, ApiError>
where
    F: FnOnce(&ChatService) -> SessionResult<T> + Send + 'static,
    T: Send + 'static,
{
    let service = Arc::clone(&state.service).lock_owned().await;
    tokio::task::spawn_blocking(move || action(&service))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Worker error: {e}")))?
        .map_err(api_error)
}

/// A selectable model.
#[derive(Debug, Serialize)]
pub struct ModelDto {
    /// Model identifier.
    pub id: &'static str,
    /// Display name.
    pub display_name: &'static str,
    /// Provider serving it.
    pub provider: ProviderKind,
    /// Whether the provider credential is configured.
    pub available: bool,
}

/// List catalogued models.
async fn list_models(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ModelDto>>, ApiError> {
    let models: Vec<ModelDto> = with_service(&state, |service| {
        Ok(MODEL_CATALOG
            .iter()
            .map(|info| ModelDto {
                id: info.id,
                display_name: info.display_name,
                provider: info.provider,
                available: service.dispatcher().has_provider(info.provider),
            })
            .collect())
    })
    .await?;
    Ok(Json(models))
}

/// List conversations grouped by recency.
async fn list_conversations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ConversationGroup>>, ApiError> {
    let today = Local::now().date_naive();
    let groups = with_service(&state, move |service| service.conversation_groups(today)).await?;
    Ok(Json(groups))
}

/// Conversation creation request.
#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    /// Model; the server default when absent.
    pub model: Option<String>,
    /// Title; generated when absent.
    pub title: Option<String>,
}

/// Create a conversation.
async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let model = request
        .model
        .map(|m| m.trim().to_string())
        .unwrap_or_else(|| state.default_model.clone());
    check_model(&model)?;

    let conversation = with_service(&state, move |service| {
        service.create_conversation(request.title.as_deref(), &model)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// A conversation with its messages.
#[derive(Debug, Serialize)]
pub struct ConversationDetail {
    /// Conversation row.
    pub conversation: Conversation,
    /// Messages in insertion order.
    pub messages: Vec<Message>,
}

/// Fetch a conversation and its messages.
async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
) -> Result<Json<ConversationDetail>, ApiError> {
    let detail = with_service(&state, move |service| {
        let conversation = service.conversation(id)?;
        let messages = service.store().get_messages(id)?;
        Ok(ConversationDetail {
            conversation,
            messages,
        })
    })
    .await?;
    Ok(Json(detail))
}

/// Conversation update request.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateConversationRequest {
    /// New title.
    pub title: Option<String>,
    /// New model; refused once the conversation has messages.
    pub model: Option<String>,
}

/// Rename a conversation or change its model.
async fn update_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
    Json(request): Json<UpdateConversationRequest>,
) -> Result<Json<Conversation>, ApiError> {
    if let Some(model) = &request.model {
        check_model(model.trim())?;
    }

    let conversation = with_service(&state, move |service| {
        let mut ctx = SessionContext {
            current: Some(service.conversation(id)?.id),
            selected_model: String::new(),
        };
        if let Some(title) = request.title.as_deref().filter(|t| !t.trim().is_empty()) {
            service.rename_current(&ctx, title)?;
        }
        if let Some(model) = request.model.as_deref() {
            service.select_model(&mut ctx, model)?;
        }
        service.conversation(id)
    })
    .await?;
    Ok(Json(conversation))
}

/// Delete a conversation and its messages.
async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
) -> Result<StatusCode, ApiError> {
    with_service(&state, move |service| {
        let mut ctx = SessionContext {
            current: Some(service.conversation(id)?.id),
            selected_model: String::new(),
        };
        service.delete_current(&mut ctx)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Chat message request.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// The user's message.
    pub content: String,
    /// Model to use while the conversation is still empty.
    pub model: Option<String>,
}

/// Error payload of the `error` SSE event.
#[derive(Debug, Serialize)]
struct StreamErrorDto {
    status: u16,
    message: String,
}

fn json_event<T: Serialize>(name: &str, payload: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// Send a message and stream the reply as SSE.
///
/// Emits `fragment` events (`{"text": ..}`), then one `done` event carrying
/// the turn outcome or one `error` event.
async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if request.content.trim().is_empty() {
        return Err(api_error(SessionError::EmptyPrompt));
    }
    if let Some(model) = &request.model {
        check_model(model.trim())?;
    }

    let service = Arc::clone(&state.service).lock_owned().await;
    let (service, found) = tokio::task::spawn_blocking(move || {
        let found = service.conversation(id);
        (service, found)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Worker error: {e}")))?;
    let conversation = found.map_err(api_error)?;

    let (tx, rx) = mpsc::channel::<Event>(EVENT_BUFFER);
    let selected_model = request
        .model
        .map(|m| m.trim().to_string())
        .unwrap_or(conversation.model);

    tokio::task::spawn_blocking(move || {
        let mut ctx = SessionContext {
            current: Some(id),
            selected_model,
        };
        let fragments = tx.clone();
        let result = service.send_message(&mut ctx, &request.content, |text| {
            let event = json_event("fragment", &serde_json::json!({ "text": text }));
            if fragments.blocking_send(event).is_err() {
                debug!(%id, "Client went away while streaming");
            }
        });

        let last = match result {
            Ok(outcome) => json_event("done", &outcome),
            Err(err) => json_event(
                "error",
                &StreamErrorDto {
                    status: status_for(&err).as_u16(),
                    message: err.to_string(),
                },
            ),
        };
        let _ = tx.blocking_send(last);
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<_, Infallible>(event), rx))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
