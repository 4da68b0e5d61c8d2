use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Language every stored message is normalised to.
pub const PIVOT_LANGUAGE: &str = "en";

// Who authored a message
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

// Represents a single message in a conversation. Never mutated once stored.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A conversation thread and its full, append-only history.
///
/// Mutations go through the methods below so that `last_updated_at` is bumped
/// every time and timestamps stay monotonic within the thread.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Conversation {
    pub id: String,
    messages: Vec<Message>,
    pub model_id: String,
    pub preferred_language: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, model_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            messages: Vec::new(),
            model_id: model_id.into(),
            preferred_language: PIVOT_LANGUAGE.to_string(),
            created_at: now,
            last_updated_at: now,
        }
    }

    /// Fresh random identifier for conversations created without one.
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Appends a message, clamping its timestamp so history order and
    /// timestamp order never disagree.
    pub fn push_message(&mut self, mut message: Message) {
        if let Some(last) = self.messages.last() {
            if message.timestamp < last.timestamp {
                message.timestamp = last.timestamp;
            }
        }
        self.messages.push(message);
        self.touch();
    }

    pub fn set_model(&mut self, model_id: impl Into<String>) {
        self.model_id = model_id.into();
        self.touch();
    }

    pub fn set_preferred_language(&mut self, language: impl Into<String>) {
        self.preferred_language = language.into();
        self.touch();
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            model_id: self.model_id.clone(),
            preferred_language: self.preferred_language.clone(),
            created_at: self.created_at,
            last_updated_at: self.last_updated_at,
            message_count: self.messages.len(),
        }
    }

    fn touch(&mut self) {
        let now = Utc::now();
        if now > self.last_updated_at {
            self.last_updated_at = now;
        }
    }
}

// Listing view of a conversation; never carries message bodies
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ConversationSummary {
    pub id: String,
    pub model_id: String,
    pub preferred_language: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub message_count: usize,
}

// How a model is served
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible hosted chat completion endpoint.
    Hosted,
    /// Weights loaded into this process, driven through a raw prompt string.
    Local,
}

// Represents a model that can be selected for a conversation
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ModelConfig {
    /// Provider-side model name.
    pub id: String,
    pub provider: ProviderKind,
    pub max_tokens: u32,
    pub temperature: f32,
    pub description: String,
    /// Foundation model for adapter-style fine-tunes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_model: Option<String>,
}

// One role/content pair of an outbound prompt
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Ordered message sequence submitted for one inference call. Built fresh
/// per turn and dropped afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PromptFrame {
    pub messages: Vec<ChatMessage>,
}

impl PromptFrame {
    pub fn system_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::System)
            .count()
    }
}
