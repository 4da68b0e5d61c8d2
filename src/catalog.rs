use crate::models::{ModelConfig, ProviderKind};
use std::collections::BTreeMap;

/// Static registry of the models this service can route a conversation to.
///
/// Lookups never substitute a different model: an unknown key is reported
/// together with the keys that would have been accepted.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: BTreeMap<String, ModelConfig>,
}

impl ModelCatalog {
    pub fn new(models: BTreeMap<String, ModelConfig>) -> Self {
        Self { models }
    }

    /// The models shipped with the service.
    pub fn builtin() -> Self {
        let mut models = BTreeMap::new();
        models.insert(
            "llama-3.1-8b".to_string(),
            hosted("llama-3.1-8b-instant", 512, "Llama 3.1 8B (fast, hosted)"),
        );
        models.insert(
            "llama-3.3-70b".to_string(),
            hosted(
                "llama-3.3-70b-versatile",
                1024,
                "Llama 3.3 70B (higher quality, hosted)",
            ),
        );
        models.insert(
            "gemma2-9b".to_string(),
            hosted("gemma2-9b-it", 512, "Gemma 2 9B instruction-tuned (hosted)"),
        );
        models.insert(
            "dgca-mistral-lora".to_string(),
            ModelConfig {
                id: "dgca-mistral-7b-lora".to_string(),
                provider: ProviderKind::Local,
                max_tokens: 512,
                temperature: 0.7,
                description: "Mistral 7B with a DGCA compliance LoRA adapter (local)".to_string(),
                base_model: Some("mistralai/Mistral-7B-Instruct-v0.2".to_string()),
            },
        );
        Self { models }
    }

    pub fn resolve(&self, key: &str) -> Result<&ModelConfig, UnknownModel> {
        self.models.get(key).ok_or_else(|| UnknownModel {
            key: key.to_string(),
            valid: self.keys(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.models.contains_key(key)
    }

    pub fn list(&self) -> &BTreeMap<String, ModelConfig> {
        &self.models
    }

    pub fn keys(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }
}

fn hosted(id: &str, max_tokens: u32, description: &str) -> ModelConfig {
    ModelConfig {
        id: id.to_string(),
        provider: ProviderKind::Hosted,
        max_tokens,
        temperature: 0.6,
        description: description.to_string(),
        base_model: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Model '{key}' is not available. Choose from: {}", valid.join(", "))]
pub struct UnknownModel {
    pub key: String,
    pub valid: Vec<String>,
}
