#![allow(dead_code)]

use async_trait::async_trait;
use chatdesk_lib::catalog::ModelCatalog;
use chatdesk_lib::codec::RawPromptCodec;
use chatdesk_lib::document::DocumentExtractor;
use chatdesk_lib::gateway::{CompletionProvider, InferenceError, InferenceGateway};
use chatdesk_lib::local::{GenerationError, GenerationParams, LocalGenerationProvider, TextGenerator};
use chatdesk_lib::models::{ModelConfig, PromptFrame, Role};
use chatdesk_lib::orchestrator::ChatOrchestrator;
use chatdesk_lib::prompt::{HistoryWindow, PromptAssembler};
use chatdesk_lib::store::ConversationStore;
use chatdesk_lib::translation::{TranslationBridge, TranslationService};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DIRECTIVE: &str = "You are a DGCA assistant.";
pub const HOSTED: &str = "llama-3.1-8b";
pub const LOCAL: &str = "dgca-mistral-lora";

/// Completion provider that answers `echo: <last user message>` (or a fixed
/// outcome) and records every frame it was given.
#[derive(Default)]
pub struct RecordingProvider {
    outcome: Option<Result<String, InferenceError>>,
    delay: Duration,
    pub frames: Mutex<Vec<PromptFrame>>,
}

impl RecordingProvider {
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn replying(text: &str) -> Self {
        Self {
            outcome: Some(Ok(text.to_string())),
            ..Self::default()
        }
    }

    pub fn failing(err: InferenceError) -> Self {
        Self {
            outcome: Some(Err(err)),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn last_frame(&self) -> PromptFrame {
        self.frames.lock().unwrap().last().cloned().expect("no frame recorded")
    }
}

#[async_trait]
impl CompletionProvider for RecordingProvider {
    async fn complete(&self, _model: &ModelConfig, frame: &PromptFrame) -> Result<String, InferenceError> {
        self.frames.lock().unwrap().push(frame.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.outcome {
            Some(outcome) => outcome.clone(),
            None => {
                let last = frame
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                Ok(format!("echo: {}", last))
            }
        }
    }
}

/// Raw generator that always runs out of memory.
pub struct OutOfMemoryGenerator;

impl TextGenerator for OutOfMemoryGenerator {
    fn generate(&self, _prompt: &str, _params: &GenerationParams) -> Result<String, GenerationError> {
        Err(GenerationError::OutOfMemory)
    }
}

/// Dictionary translator. Unknown phrases fail, so lookups double as
/// assertions on what was sent.
#[derive(Default)]
pub struct PhrasebookTranslator {
    detections: HashMap<String, String>,
    phrases: HashMap<(String, String, String), String>,
}

impl PhrasebookTranslator {
    pub fn detects(mut self, text: &str, language: &str) -> Self {
        self.detections.insert(text.to_string(), language.to_string());
        self
    }

    pub fn knows(mut self, text: &str, source: &str, target: &str, translated: &str) -> Self {
        self.phrases.insert(
            (text.to_string(), source.to_string(), target.to_string()),
            translated.to_string(),
        );
        self
    }
}

#[async_trait]
impl TranslationService for PhrasebookTranslator {
    async fn detect(&self, text: &str) -> anyhow::Result<String> {
        Ok(self.detections.get(text).cloned().unwrap_or_else(|| "en".to_string()))
    }

    async fn translate(&self, text: &str, source: &str, target: &str) -> anyhow::Result<String> {
        self.phrases
            .get(&(text.to_string(), source.to_string(), target.to_string()))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no phrase for {:?} {}->{}", text, source, target))
    }
}

/// Translator whose backend is down.
pub struct OfflineTranslator;

#[async_trait]
impl TranslationService for OfflineTranslator {
    async fn detect(&self, _text: &str) -> anyhow::Result<String> {
        Err(anyhow::anyhow!("translation backend offline"))
    }

    async fn translate(&self, _text: &str, _source: &str, _target: &str) -> anyhow::Result<String> {
        Err(anyhow::anyhow!("translation backend offline"))
    }
}

pub struct Harness {
    pub orchestrator: Arc<ChatOrchestrator>,
    pub store: Arc<ConversationStore>,
}

pub fn harness(hosted: Arc<dyn CompletionProvider>, translator: TranslationBridge) -> Harness {
    let local = LocalGenerationProvider::new(Arc::new(OutOfMemoryGenerator), RawPromptCodec::default());
    harness_with_local(hosted, Arc::new(local), translator)
}

pub fn harness_with_local(
    hosted: Arc<dyn CompletionProvider>,
    local: Arc<dyn CompletionProvider>,
    translator: TranslationBridge,
) -> Harness {
    let store = Arc::new(ConversationStore::new());
    let orchestrator = ChatOrchestrator::new(
        store.clone(),
        Arc::new(ModelCatalog::builtin()),
        PromptAssembler::new(DIRECTIVE, HistoryWindow::Exchanges(3)),
        InferenceGateway::new(hosted, local),
        translator,
        DocumentExtractor::new(2_000),
        HOSTED,
    );
    Harness {
        orchestrator: Arc::new(orchestrator),
        store,
    }
}
