use crate::prompt::{HistoryWindow, DEFAULT_DIRECTIVE};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use keyring::Entry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HistoryUnit {
    /// Count individual user/assistant messages.
    Messages,
    /// Count user/assistant exchange pairs.
    Exchanges,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TranslationBackend {
    Google,
    Off,
}

/// Service settings, read from flags or `CHATDESK_*` environment variables.
#[derive(Debug, Clone, Parser)]
#[command(name = "chatdesk", about = "Multilingual chat backend")]
pub struct Settings {
    #[arg(long, env = "CHATDESK_BIND", default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,

    /// Base URL of the OpenAI-compatible hosted API.
    #[arg(long, env = "CHATDESK_API_URL", default_value = "https://api.groq.com/openai/v1")]
    pub api_url: String,

    /// Where the hosted API key lives: `env:VAR_NAME` or `keyring`.
    #[arg(long, env = "CHATDESK_API_KEY_REF", default_value = "env:GROQ_API_KEY")]
    pub api_key_ref: String,

    #[arg(long, env = "CHATDESK_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Total attempts for a hosted completion, first try included.
    #[arg(long, env = "CHATDESK_MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: usize,

    #[arg(long, env = "CHATDESK_RETRY_DELAY_MS", default_value_t = 500)]
    pub retry_delay_ms: u64,

    #[arg(long, env = "CHATDESK_HISTORY_WINDOW", default_value_t = 3)]
    pub history_window: usize,

    #[arg(long, env = "CHATDESK_HISTORY_UNIT", value_enum, default_value_t = HistoryUnit::Exchanges)]
    pub history_unit: HistoryUnit,

    /// File holding the system directive; the bundled one is used if unset.
    #[arg(long, env = "CHATDESK_DIRECTIVE_FILE")]
    pub directive_file: Option<PathBuf>,

    #[arg(long, env = "CHATDESK_TRANSLATION", value_enum, default_value_t = TranslationBackend::Google)]
    pub translation: TranslationBackend,

    #[arg(
        long,
        env = "CHATDESK_TRANSLATE_URL",
        default_value = "https://translate.googleapis.com/translate_a/single"
    )]
    pub translate_url: String,

    #[arg(long, env = "CHATDESK_MAX_DOCUMENT_CHARS", default_value_t = 12_000)]
    pub max_document_chars: usize,

    /// Model used when a chat request names none.
    #[arg(long, env = "CHATDESK_DEFAULT_MODEL", default_value = "llama-3.1-8b")]
    pub default_model: String,

    /// GGUF weights of the local base model.
    #[arg(long, env = "CHATDESK_LOCAL_MODEL_PATH")]
    pub local_model_path: Option<PathBuf>,

    /// LoRA adapter applied on top of the local base model.
    #[arg(long, env = "CHATDESK_LOCAL_ADAPTER_PATH")]
    pub local_adapter_path: Option<PathBuf>,

    #[arg(long, env = "CHATDESK_LOCAL_CTX_SIZE", default_value_t = 4096)]
    pub local_ctx_size: u32,

    #[arg(long, env = "CHATDESK_LOCAL_THREADS", default_value_t = 0)]
    pub local_threads: i32,

    #[arg(long, env = "CHATDESK_LOCAL_MAX_NEW_TOKENS", default_value_t = 512)]
    pub local_max_new_tokens: u32,

    #[arg(long, env = "CHATDESK_LOCAL_TOP_P", default_value_t = 0.9)]
    pub local_top_p: f32,

    #[arg(long, env = "CHATDESK_LOCAL_SEED", default_value_t = 42)]
    pub local_seed: u32,
}

impl Settings {
    pub fn history_window(&self) -> HistoryWindow {
        match self.history_unit {
            HistoryUnit::Messages => HistoryWindow::Messages(self.history_window),
            HistoryUnit::Exchanges => HistoryWindow::Exchanges(self.history_window),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Loads the system directive from `directive_file`, or the bundled text.
    pub fn load_directive(&self) -> Result<String> {
        match &self.directive_file {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read directive file {}", path.display())),
            None => Ok(DEFAULT_DIRECTIVE.to_string()),
        }
    }
}

// --- API Key Retrieval ---

const KEYRING_SERVICE: &str = "chatdesk_api_key";

/// Resolves an API key reference. `env:NAME` reads the environment variable,
/// `keyring` reads the OS keyring entry for `account`.
pub fn get_api_key(key_ref: &str, account: &str) -> Result<String> {
    let key = match key_ref {
        ref_str if ref_str.starts_with("env:") => {
            let env_var_name = ref_str.trim_start_matches("env:");
            log::debug!("Retrieving API key from environment variable: {}", env_var_name);
            std::env::var(env_var_name).context(format!(
                "Failed to get API key from environment variable '{}'",
                env_var_name
            ))?
        }
        "keyring" => {
            let entry = Entry::new(KEYRING_SERVICE, account).context("Failed to create keyring entry")?;
            log::debug!("Retrieving API key from keyring for account: {}", account);
            entry.get_password().context(format!(
                "Failed to get API key from keyring for '{}'",
                account
            ))?
        }
        other => return Err(anyhow::anyhow!("Unsupported api_key_ref format: {}", other)),
    };

    let key = key.trim().to_string();
    if key.is_empty() || key.starts_with("YOUR_") {
        return Err(anyhow::anyhow!("API key referenced by '{}' is not configured", key_ref));
    }
    Ok(key)
}
