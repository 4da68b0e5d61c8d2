use crate::catalog::{ModelCatalog, UnknownModel};
use crate::document::DocumentExtractor;
use crate::gateway::InferenceGateway;
use crate::language::detect_language_change;
use crate::models::{Conversation, ConversationSummary, Message, ModelConfig, Role};
use crate::prompt::PromptAssembler;
use crate::store::ConversationStore;
use crate::translation::{is_pivot, normalize_code, Direction, TranslationBridge};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One inbound user turn.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub message: String,
    /// Catalog key. When absent the conversation keeps its current model,
    /// and a new conversation starts on the default one.
    pub model_id: Option<String>,
    pub conversation_id: Option<String>,
    /// Raw PDF bytes to use as context for this turn only.
    pub document: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatReply {
    pub reply: String,
    pub conversation_id: String,
    pub model_id: String,
    pub language: String,
}

/// Requests the orchestrator refuses outright. Inference problems are not
/// errors here: they come back as the assistant's reply.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    UnknownModel(#[from] UnknownModel),
    #[error("Conversation '{0}' not found")]
    ConversationNotFound(String),
    #[error("Message must not be empty")]
    EmptyMessage,
    #[error("Language code must not be empty")]
    EmptyLanguage,
    #[error("Chat turn failed: {0}")]
    TurnFailed(String),
}

/// Runs chat turns and the conversation management operations around them.
pub struct ChatOrchestrator {
    store: Arc<ConversationStore>,
    catalog: Arc<ModelCatalog>,
    assembler: PromptAssembler,
    gateway: InferenceGateway,
    translator: TranslationBridge,
    extractor: DocumentExtractor,
    default_model: String,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<ConversationStore>,
        catalog: Arc<ModelCatalog>,
        assembler: PromptAssembler,
        gateway: InferenceGateway,
        translator: TranslationBridge,
        extractor: DocumentExtractor,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            catalog,
            assembler,
            gateway,
            translator,
            extractor,
            default_model: default_model.into(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Runs one turn on its own task. A caller that goes away (a client
    /// disconnect dropping the HTTP handler) does not cancel the turn: it
    /// still completes and is recorded.
    pub async fn chat(self: &Arc<Self>, request: ChatRequest) -> Result<ChatReply, ChatError> {
        let this = self.clone();
        tokio::spawn(async move { this.run_turn(request).await })
            .await
            .map_err(|e| {
                log::error!("Chat turn task failed: {}", e);
                ChatError::TurnFailed(e.to_string())
            })?
    }

    async fn run_turn(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        let utterance = request.message.trim();
        if utterance.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let requested = request
            .model_id
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty());
        // Resolve before touching the store so a bad key leaves no trace.
        if let Some(key) = requested {
            self.catalog.resolve(key)?;
        }

        let handle = self.store.get_or_create(
            request.conversation_id.as_deref(),
            requested.unwrap_or(self.default_model.as_str()),
        );
        let _turn = handle.begin_turn().await;

        // Without an explicit key the conversation keeps the model it has.
        let (model_key, language) = handle
            .update(|convo| {
                if let Some(key) = requested {
                    if convo.model_id != key {
                        log::info!("Conversation {} switched to model {}", convo.id, key);
                        convo.set_model(key);
                    }
                }
                (convo.model_id.clone(), convo.preferred_language.clone())
            })
            .await;
        let model = self.catalog.resolve(&model_key)?.clone();
        log::info!("Chat turn on conversation {} with model {}", handle.id(), model_key);

        let document_context = match request.document {
            Some(bytes) if !bytes.is_empty() => Some(self.extractor.extract_text(bytes).await),
            _ => None,
        };

        let detected = self.translator.detect_language(utterance).await;

        if let Some(change) = detect_language_change(utterance) {
            let code = change.named.map(str::to_string).unwrap_or(detected);
            log::info!("Conversation {} preferred language -> '{}'", handle.id(), code);
            handle
                .update(|convo| {
                    convo.set_preferred_language(code.clone());
                    convo.push_message(Message::new(
                        Role::System,
                        format!("Preferred language changed to '{}'.", code),
                    ));
                })
                .await;
            return Ok(ChatReply {
                reply: format!("Language preference updated to '{}'.", code),
                conversation_id: handle.id().to_string(),
                model_id: model_key,
                language: code,
            });
        }

        let pivot_text = if !is_pivot(&language) && !is_pivot(&detected) {
            self.translator
                .translate(utterance, &detected, Direction::ToPivot)
                .await
        } else {
            utterance.to_string()
        };

        let history = handle.snapshot().await;
        let frame = self
            .assembler
            .build(history.messages(), &pivot_text, document_context.as_deref());

        let answer = match self.gateway.generate(&model, &frame).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                log::error!("Inference failed on conversation {}: {:?}", handle.id(), e);
                e.to_string()
            }
        };

        handle
            .update(|convo| {
                convo.push_message(Message::new(Role::User, pivot_text));
                convo.push_message(Message::new(Role::Assistant, answer.clone()));
            })
            .await;

        let reply = self
            .translator
            .translate(&answer, &language, Direction::FromPivot)
            .await;

        Ok(ChatReply {
            reply,
            conversation_id: handle.id().to_string(),
            model_id: model_key,
            language,
        })
    }

    pub fn list_models(&self) -> &BTreeMap<String, ModelConfig> {
        self.catalog.list()
    }

    pub fn get_model(&self, key: &str) -> Result<&ModelConfig, ChatError> {
        Ok(self.catalog.resolve(key)?)
    }

    pub async fn list_conversations(&self) -> Vec<ConversationSummary> {
        self.store.list().await
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Conversation, ChatError> {
        match self.store.get(id) {
            Some(handle) => Ok(handle.snapshot().await),
            None => Err(ChatError::ConversationNotFound(id.to_string())),
        }
    }

    /// Always succeeds; returns whether a conversation was actually removed.
    pub fn delete_conversation(&self, id: &str) -> bool {
        self.store.delete(id)
    }

    pub async fn set_conversation_model(&self, id: &str, model_key: &str) -> Result<(), ChatError> {
        let handle = self
            .store
            .get(id)
            .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))?;
        self.catalog.resolve(model_key)?;
        handle.update(|convo| convo.set_model(model_key)).await;
        log::info!("Conversation {} model set to {}", id, model_key);
        Ok(())
    }

    pub async fn set_conversation_language(&self, id: &str, language: &str) -> Result<String, ChatError> {
        let handle = self
            .store
            .get(id)
            .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))?;
        let code = normalize_code(language);
        if code.is_empty() {
            return Err(ChatError::EmptyLanguage);
        }
        handle
            .update(|convo| convo.set_preferred_language(code.clone()))
            .await;
        log::info!("Conversation {} language set to '{}'", id, code);
        Ok(code)
    }
}
