use crate::catalog::ModelCatalog;
use crate::codec::RawPromptCodec;
use crate::config::{Settings, TranslationBackend};
use crate::document::DocumentExtractor;
use crate::gateway::{InferenceGateway, OpenAICompatibleProvider, RetryPolicy};
use crate::local::{LocalGenerationProvider, TextGenerator, UnavailableGenerator};
use crate::orchestrator::ChatOrchestrator;
use crate::prompt::PromptAssembler;
use crate::store::ConversationStore;
use crate::translation::{GoogleTranslateService, TranslationBridge};
use anyhow::Context;
use std::sync::Arc;

// Shared state handed to every HTTP handler
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChatOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: ChatOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Wires every component from the parsed settings. Loads the local
    /// model when one is configured, so this can take a while.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let catalog = ModelCatalog::builtin();
        catalog
            .resolve(&settings.default_model)
            .context("Invalid --default-model")?;

        let directive = settings.load_directive()?;
        let assembler = PromptAssembler::new(directive, settings.history_window());

        let hosted = OpenAICompatibleProvider::new(
            settings.api_url.clone(),
            settings.api_key_ref.clone(),
            settings.request_timeout(),
            RetryPolicy::new(settings.max_attempts, settings.retry_delay()),
        )?;
        let local = LocalGenerationProvider::new(local_generator(settings), RawPromptCodec::default())
            .with_sampling(settings.local_max_new_tokens, settings.local_top_p);
        let gateway = InferenceGateway::new(Arc::new(hosted), Arc::new(local));

        let translator = match settings.translation {
            TranslationBackend::Google => {
                let service =
                    GoogleTranslateService::new(settings.translate_url.clone(), settings.request_timeout())?;
                TranslationBridge::new(Arc::new(service))
            }
            TranslationBackend::Off => {
                log::info!("Translation disabled, every turn is handled in English");
                TranslationBridge::disabled()
            }
        };

        let orchestrator = ChatOrchestrator::new(
            Arc::new(ConversationStore::new()),
            Arc::new(catalog),
            assembler,
            gateway,
            translator,
            DocumentExtractor::new(settings.max_document_chars),
            settings.default_model.clone(),
        );
        Ok(Self::new(orchestrator))
    }
}

#[cfg(feature = "llama")]
fn local_generator(settings: &Settings) -> Arc<dyn TextGenerator> {
    use crate::llama::{LlamaCppGenerator, LlamaGeneratorConfig};

    let Some(model_path) = settings.local_model_path.clone() else {
        log::warn!("No local model path configured, local models are unavailable");
        return Arc::new(UnavailableGenerator::new(
            "No local model is configured on this server. Set --local-model-path to enable it.",
        ));
    };
    let cfg = LlamaGeneratorConfig {
        model_path,
        adapter_path: settings.local_adapter_path.clone(),
        ctx_size: settings.local_ctx_size,
        threads: settings.local_threads,
        seed: settings.local_seed,
    };
    match LlamaCppGenerator::load(cfg) {
        Ok(generator) => Arc::new(generator),
        Err(e) => {
            log::error!("Failed to load local model: {:#}", e);
            Arc::new(UnavailableGenerator::new(format!("The local model failed to load: {:#}", e)))
        }
    }
}

#[cfg(not(feature = "llama"))]
fn local_generator(settings: &Settings) -> Arc<dyn TextGenerator> {
    if settings.local_model_path.is_some() {
        log::warn!("--local-model-path is ignored: built without the `llama` feature");
    }
    Arc::new(UnavailableGenerator::new("Local generation is not enabled in this build."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn builds_from_default_settings() {
        let settings = Settings::parse_from(["chatdesk", "--translation", "off"]);
        let state = AppState::from_settings(&settings).unwrap();
        assert_eq!(state.orchestrator.default_model(), "llama-3.1-8b");
        assert!(state.orchestrator.list_models().contains_key("dgca-mistral-lora"));
    }

    #[test]
    fn rejects_unknown_default_model() {
        let settings = Settings::parse_from(["chatdesk", "--default-model", "gpt-17"]);
        assert!(AppState::from_settings(&settings).is_err());
    }
}
