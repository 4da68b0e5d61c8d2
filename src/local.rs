use crate::codec::RawPromptCodec;
use crate::gateway::{CompletionProvider, InferenceError};
use crate::models::{ModelConfig, PromptFrame};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Sampling parameters for one raw generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("out of memory during generation")]
    OutOfMemory,
    #[error("{0}")]
    Failed(String),
    #[error("{0}")]
    Unavailable(String),
}

impl From<GenerationError> for InferenceError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::OutOfMemory => InferenceError::OutOfMemory,
            GenerationError::Failed(detail) => InferenceError::Generation(detail),
            GenerationError::Unavailable(detail) => InferenceError::Unavailable(detail),
        }
    }
}

/// A loaded model driven by a raw prompt string.
///
/// `generate` blocks for the whole generation and returns the full decoded
/// sequence, prompt included. Implementations must free every per-call
/// buffer (KV cache, batches) before returning, on success and on failure.
pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, GenerationError>;
}

/// Stands in for the local backend when this build cannot load weights.
pub struct UnavailableGenerator {
    reason: String,
}

impl UnavailableGenerator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl TextGenerator for UnavailableGenerator {
    fn generate(&self, _prompt: &str, _params: &GenerationParams) -> Result<String, GenerationError> {
        Err(GenerationError::Unavailable(self.reason.clone()))
    }
}

/// Local-weights capability of the gateway.
///
/// Calls are serialised through a single slot since the loaded model is
/// shared by every conversation, and run on the blocking pool so the
/// runtime keeps serving other requests. No retries.
pub struct LocalGenerationProvider {
    generator: Arc<dyn TextGenerator>,
    codec: RawPromptCodec,
    // Shared with the blocking task so the slot stays taken until the
    // generation really ends, even if the caller is dropped.
    slot: Arc<Mutex<()>>,
    max_new_tokens: u32,
    top_p: f32,
}

impl LocalGenerationProvider {
    pub fn new(generator: Arc<dyn TextGenerator>, codec: RawPromptCodec) -> Self {
        Self {
            generator,
            codec,
            slot: Arc::new(Mutex::new(())),
            max_new_tokens: 512,
            top_p: 0.9,
        }
    }

    pub fn with_sampling(mut self, max_new_tokens: u32, top_p: f32) -> Self {
        self.max_new_tokens = max_new_tokens;
        self.top_p = top_p;
        self
    }
}

#[async_trait]
impl CompletionProvider for LocalGenerationProvider {
    async fn complete(&self, model: &ModelConfig, frame: &PromptFrame) -> Result<String, InferenceError> {
        let prompt = self.codec.encode(&frame.messages);
        let params = GenerationParams {
            max_new_tokens: model.max_tokens.min(self.max_new_tokens),
            temperature: model.temperature,
            top_p: self.top_p,
        };

        let raw = {
            let slot = self.slot.clone().lock_owned().await;
            log::debug!("Local generation slot acquired ({} prompt chars)", prompt.len());
            let generator = self.generator.clone();
            let task_prompt = prompt.clone();
            tokio::task::spawn_blocking(move || {
                let _slot = slot;
                generator.generate(&task_prompt, &params)
            })
            .await
            .map_err(|e| {
                log::error!("Local generation task aborted: {}", e);
                InferenceError::Generation(format!("generation task aborted: {}", e))
            })?
            .map_err(|e| {
                log::error!("Local generation failed for {}: {}", model.id, e);
                InferenceError::from(e)
            })?
        };

        self.codec.decode(&raw, &prompt).map_err(|e| {
            log::warn!("Discarding local completion for {}: {}", model.id, e);
            InferenceError::LowConfidence
        })
    }
}
