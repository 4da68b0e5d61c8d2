use crate::config;
use crate::models::{ChatMessage, ModelConfig, PromptFrame, ProviderKind};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Every way an inference call can fail. The `Display` text is shown to the
/// user as the assistant's reply, so it is written for them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    #[error("❌ API Error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("❌ Request timed out. Please try again.")]
    Timeout,
    #[error("❌ Network error: {0}")]
    Network(String),
    #[error("❌ Invalid API response format: {0}")]
    MalformedResponse(String),
    #[error("⚠️ Please configure your API key: {0}")]
    MissingCredentials(String),
    #[error("❌ The local model ran out of memory while generating. Try a shorter question or start a new conversation.")]
    OutOfMemory,
    #[error("❌ Local generation failed: {0}")]
    Generation(String),
    #[error("⚠️ {0}")]
    Unavailable(String),
    #[error("⚠️ The model returned an empty or unreadable reply. Please rephrase your question.")]
    LowConfidence,
}

impl InferenceError {
    /// Failures worth another attempt against a hosted endpoint.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InferenceError::Status { .. } | InferenceError::Timeout | InferenceError::Network(_)
        )
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            InferenceError::Timeout
        } else {
            InferenceError::Network(err.to_string())
        }
    }
}

/// How many times a transient hosted failure is attempted, and the pause
/// between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first one included.
    pub max_attempts: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// attempt ceiling is reached. The last error is returned as is.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T, InferenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InferenceError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    log::warn!("Retry {}/{} after error: {}", attempt, self.max_attempts, err);
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// One inference capability: turns a prompt frame into completion text.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, model: &ModelConfig, frame: &PromptFrame) -> Result<String, InferenceError>;
}

/// Routes each call to the provider serving the model's `ProviderKind`.
#[derive(Clone)]
pub struct InferenceGateway {
    hosted: Arc<dyn CompletionProvider>,
    local: Arc<dyn CompletionProvider>,
}

impl InferenceGateway {
    pub fn new(hosted: Arc<dyn CompletionProvider>, local: Arc<dyn CompletionProvider>) -> Self {
        Self { hosted, local }
    }

    pub async fn generate(&self, model: &ModelConfig, frame: &PromptFrame) -> Result<String, InferenceError> {
        let provider = match model.provider {
            ProviderKind::Hosted => &self.hosted,
            ProviderKind::Local => &self.local,
        };
        log::info!(
            "Generating with {:?} model {} ({} messages)",
            model.provider,
            model.id,
            frame.messages.len()
        );
        provider.complete(model, frame).await
    }
}

// --- OpenAI Compatible Provider Implementation ---

#[derive(Serialize, Debug)]
struct OpenAIRequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize, Debug)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize, Debug)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Deserialize, Debug)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

/// Hosted chat completion over an OpenAI-compatible endpoint.
pub struct OpenAICompatibleProvider {
    client: Client,
    api_url: String,
    api_key_ref: String,
    retry: RetryPolicy,
}

impl OpenAICompatibleProvider {
    pub fn new(
        api_url: impl Into<String>,
        api_key_ref: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key_ref: api_key_ref.into(),
            retry,
        })
    }

    async fn send_once(
        &self,
        request_url: &str,
        api_key: &str,
        body: &OpenAIRequestBody<'_>,
    ) -> Result<String, InferenceError> {
        let response = self
            .client
            .post(request_url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<Failed to read error body>".to_string());
            log::error!("Completion request failed with status {}: {}", status, error_body);
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body: error_body,
            });
        }

        let text = response.text().await?;
        let parsed: OpenAIResponse = serde_json::from_str(&text)
            .map_err(|e| InferenceError::MalformedResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| InferenceError::MalformedResponse("response carried no message content".to_string()))
    }
}

#[async_trait]
impl CompletionProvider for OpenAICompatibleProvider {
    async fn complete(&self, model: &ModelConfig, frame: &PromptFrame) -> Result<String, InferenceError> {
        let api_key = config::get_api_key(&self.api_key_ref, "hosted")
            .map_err(|e| InferenceError::MissingCredentials(format!("{:#}", e)))?;

        let body = OpenAIRequestBody {
            model: &model.id,
            messages: &frame.messages,
            temperature: model.temperature,
            max_tokens: model.max_tokens,
            stream: false,
        };
        let request_url = format!("{}/chat/completions", self.api_url.trim_end_matches('/'));
        log::info!("Sending request to OpenAI compatible API: {} using model: {}", request_url, model.id);

        self.retry
            .run(|| self.send_once(&request_url, &api_key, &body))
            .await
    }
}
