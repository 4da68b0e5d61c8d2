use crate::models::PIVOT_LANGUAGE;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// A translation backend. Failures are reported, not hidden; the
/// [`TranslationBridge`] decides what to fall back to.
#[async_trait]
pub trait TranslationService: Send + Sync {
    /// Language code of `text`.
    async fn detect(&self, text: &str) -> Result<String>;
    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the given language into the pivot language.
    ToPivot,
    /// From the pivot language into the given language.
    FromPivot,
}

/// Best-effort translation used by the chat flow. Never fails: detection
/// falls back to the pivot language and translation to the input text.
#[derive(Clone)]
pub struct TranslationBridge {
    service: Option<Arc<dyn TranslationService>>,
}

impl TranslationBridge {
    pub fn new(service: Arc<dyn TranslationService>) -> Self {
        Self {
            service: Some(service),
        }
    }

    /// A bridge that never calls out: everything is treated as English.
    pub fn disabled() -> Self {
        Self { service: None }
    }

    pub async fn detect_language(&self, text: &str) -> String {
        let Some(service) = &self.service else {
            return PIVOT_LANGUAGE.to_string();
        };
        if text.trim().is_empty() {
            return PIVOT_LANGUAGE.to_string();
        }
        match service.detect(text).await {
            Ok(code) if !code.trim().is_empty() => normalize_code(&code),
            Ok(_) => PIVOT_LANGUAGE.to_string(),
            Err(e) => {
                log::warn!("Language detection failed, assuming '{}': {:#}", PIVOT_LANGUAGE, e);
                PIVOT_LANGUAGE.to_string()
            }
        }
    }

    pub async fn translate(&self, text: &str, language: &str, direction: Direction) -> String {
        let Some(service) = &self.service else {
            return text.to_string();
        };
        if text.trim().is_empty() || is_pivot(language) {
            return text.to_string();
        }
        let (source, target) = match direction {
            Direction::ToPivot => (language, PIVOT_LANGUAGE),
            Direction::FromPivot => (PIVOT_LANGUAGE, language),
        };
        match service.translate(text, source, target).await {
            Ok(translated) if !translated.trim().is_empty() => translated,
            Ok(_) => {
                log::warn!("Empty translation {} -> {}, keeping original text", source, target);
                text.to_string()
            }
            Err(e) => {
                log::warn!("Translation {} -> {} failed, keeping original text: {:#}", source, target, e);
                text.to_string()
            }
        }
    }
}

pub fn is_pivot(language: &str) -> bool {
    normalize_code(language) == PIVOT_LANGUAGE
}

/// Lower-cased primary subtag: `en-US` -> `en`. Chinese keeps its script
/// region since the two variants translate differently.
pub fn normalize_code(code: &str) -> String {
    let code = code.trim().to_ascii_lowercase().replace('_', "-");
    if code.starts_with("zh") {
        return code;
    }
    code.split('-').next().unwrap_or_default().to_string()
}

/// Client for the public Google Translate endpoint.
pub struct GoogleTranslateService {
    client: Client,
    url: String,
}

impl GoogleTranslateService {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build translation HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn query(&self, text: &str, source: &str, target: &str) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("client", "gtx"),
                ("sl", source),
                ("tl", target),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await
            .context("Failed to reach translation service")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("translation service returned status {}", status));
        }
        response
            .json::<serde_json::Value>()
            .await
            .context("Failed to parse translation response")
    }
}

#[async_trait]
impl TranslationService for GoogleTranslateService {
    async fn detect(&self, text: &str) -> Result<String> {
        let body = self.query(text, "auto", PIVOT_LANGUAGE).await?;
        body.get(2)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .context("translation response carried no detected language")
    }

    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String> {
        let body = self.query(text, source, target).await?;
        let segments = body
            .get(0)
            .and_then(|v| v.as_array())
            .context("translation response carried no segments")?;
        let translated: String = segments
            .iter()
            .filter_map(|segment| segment.get(0).and_then(|v| v.as_str()))
            .collect();
        Ok(translated)
    }
}
