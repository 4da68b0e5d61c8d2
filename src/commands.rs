// HTTP handlers exposed to the web frontend

use crate::models::{Conversation, ConversationSummary, ModelConfig};
use crate::orchestrator::{ChatError, ChatReply, ChatRequest};
use crate::state::AppState;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Uploads (PDF context) can be large.
const CHAT_BODY_LIMIT: usize = 20 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/models", get(list_models))
        .route("/models/:key", get(get_model))
        .route("/conversations", get(list_conversations))
        .route(
            "/conversations/:id",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/conversations/:id/model", put(update_conversation_model))
        .route("/conversations/:id/language", put(update_conversation_language))
        .route(
            "/chat",
            post(send_message).layer(DefaultBodyLimit::max(CHAT_BODY_LIMIT)),
        )
        .with_state(state)
}

// --- Errors ---

#[derive(Serialize, Debug)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    valid_models: Option<Vec<String>>,
}

/// A failed request, rendered as JSON `{ "error": ..., "valid_models": [...] }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: error.into(),
                valid_models: None,
            },
        }
    }

    fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let message = err.to_string();
        match err {
            ChatError::UnknownModel(unknown) => {
                let mut api = Self::bad_request(message);
                api.body.valid_models = Some(unknown.valid);
                api
            }
            ChatError::ConversationNotFound(_) => Self::new(StatusCode::NOT_FOUND, message),
            ChatError::EmptyMessage | ChatError::EmptyLanguage => Self::bad_request(message),
            ChatError::TurnFailed(_) => Self::new(StatusCode::INTERNAL_SERVER_ERROR, message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// --- Handlers ---

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_models(State(state): State<AppState>) -> Json<BTreeMap<String, ModelConfig>> {
    log::info!("Frontend requested to list models");
    Json(state.orchestrator.list_models().clone())
}

async fn get_model(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ModelConfig>, ApiError> {
    log::info!("Frontend requested model '{}'", key);
    match state.orchestrator.get_model(&key) {
        Ok(model) => Ok(Json(model.clone())),
        Err(e) => {
            log::error!("Model lookup failed: {}", e);
            Err(ApiError::from(e).with_status(StatusCode::NOT_FOUND))
        }
    }
}

async fn list_conversations(State(state): State<AppState>) -> Json<Vec<ConversationSummary>> {
    log::info!("Frontend requested to list conversations");
    Json(state.orchestrator.list_conversations().await)
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    log::info!("Frontend requested conversation ID: {}", conversation_id);
    match state.orchestrator.get_conversation(&conversation_id).await {
        Ok(convo) => Ok(Json(convo)),
        Err(e) => {
            log::error!("Failed to get conversation {}: {}", conversation_id, e);
            Err(e.into())
        }
    }
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Json<Value> {
    log::warn!("Frontend requested to delete conversation ID: {}", conversation_id);
    state.orchestrator.delete_conversation(&conversation_id);
    Json(json!({ "success": true }))
}

#[derive(Deserialize, Debug)]
struct UpdateModelBody {
    model_id: String,
}

async fn update_conversation_model(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(body): Json<UpdateModelBody>,
) -> Result<Json<Value>, ApiError> {
    log::info!(
        "Frontend requested model '{}' for conversation {}",
        body.model_id,
        conversation_id
    );
    match state
        .orchestrator
        .set_conversation_model(&conversation_id, &body.model_id)
        .await
    {
        Ok(()) => Ok(Json(json!({ "success": true, "model_id": body.model_id }))),
        Err(e) => {
            log::error!("Failed to update model for conversation {}: {}", conversation_id, e);
            Err(e.into())
        }
    }
}

#[derive(Deserialize, Debug)]
struct UpdateLanguageBody {
    language: String,
}

async fn update_conversation_language(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(body): Json<UpdateLanguageBody>,
) -> Result<Json<Value>, ApiError> {
    log::info!(
        "Frontend requested language '{}' for conversation {}",
        body.language,
        conversation_id
    );
    match state
        .orchestrator
        .set_conversation_language(&conversation_id, &body.language)
        .await
    {
        Ok(code) => Ok(Json(json!({ "success": true, "language": code }))),
        Err(e) => {
            log::error!("Failed to update language for conversation {}: {}", conversation_id, e);
            Err(e.into())
        }
    }
}

async fn send_message(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ChatReply>, ApiError> {
    let request = read_chat_form(multipart).await?;
    log::info!(
        "Frontend sent a message to conversation {:?} (document attached: {})",
        request.conversation_id,
        request.document.is_some()
    );
    match state.orchestrator.chat(request).await {
        Ok(reply) => Ok(Json(reply)),
        Err(e) => {
            log::error!("Chat turn rejected: {}", e);
            Err(e.into())
        }
    }
}

async fn read_chat_form(mut multipart: Multipart) -> Result<ChatRequest, ApiError> {
    let mut request = ChatRequest::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid form data: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;
                if !bytes.is_empty() {
                    request.document = Some(bytes.to_vec());
                }
            }
            "message" | "model_id" | "conversation_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid field '{}': {}", name, e)))?;
                let value = text.trim().to_string();
                match name.as_str() {
                    "message" => request.message = value,
                    "model_id" if !value.is_empty() => request.model_id = Some(value),
                    "conversation_id" if !value.is_empty() => request.conversation_id = Some(value),
                    _ => {}
                }
            }
            other => log::debug!("Ignoring unexpected form field '{}'", other),
        }
    }
    Ok(request)
}
