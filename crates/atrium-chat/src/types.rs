use serde::{Deserialize, Serialize};

use atrium_core::TokenUsage;

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

/// Tenant root. Domain records carry a nullable workspace id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    /// Globally unique.
    pub slug: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A configured persona: prompt, model, sampling, and retrieval bounds.
/// Soft-deletable; deleted assistants hide from listings but are recoverable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
    pub workspace_id: Option<String>,
    pub name: String,
    pub description: String,
    pub instructions: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub max_retrieval_chunks: u32,
    pub max_context_tokens: u32,
    pub avatar_url: Option<String>,
    pub is_deleted: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields accepted when creating or updating an assistant.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantParams {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructions: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_retrieval_chunks")]
    pub max_retrieval_chunks: u32,
    #[serde(default = "default_context_tokens")]
    pub max_context_tokens: u32,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_retrieval_chunks() -> u32 {
    5
}
fn default_context_tokens() -> u32 {
    4000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub assistant_id: Option<String>,
    pub user_id: Option<String>,
    pub workspace_id: Option<String>,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Listing row: a conversation plus its message count.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub message_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("unknown message role: {}", other)),
        }
    }
}

/// One turn in a conversation, strictly ordered by insertion. Assistant
/// messages may be created empty and filled as the stream completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub model: Option<String>,
    pub tokens_used: Option<TokenUsage>,
    /// "up" or "down".
    pub feedback: Option<String>,
    pub feedback_reason: Option<String>,
    pub feedback_context: Option<String>,
    pub created_at: String,
}
