use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Also returned when the caller does not own the conversation, so
    /// existence never leaks across the ownership boundary.
    #[error("conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("assistant not found: {id}")]
    AssistantNotFound { id: String },

    #[error("message not found: {id}")]
    MessageNotFound { id: String },

    #[error("workspace not found: {id}")]
    WorkspaceNotFound { id: String },

    #[error("workspace slug already exists: {slug}")]
    SlugExists { slug: String },

    #[error("{0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl From<ChatError> for atrium_core::AtriumError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::ConversationNotFound { id } => atrium_core::AtriumError::NotFound {
                resource: "conversation",
                id,
            },
            ChatError::AssistantNotFound { id } => atrium_core::AtriumError::NotFound {
                resource: "assistant",
                id,
            },
            ChatError::MessageNotFound { id } => atrium_core::AtriumError::NotFound {
                resource: "message",
                id,
            },
            ChatError::WorkspaceNotFound { id } => atrium_core::AtriumError::NotFound {
                resource: "workspace",
                id,
            },
            ChatError::SlugExists { slug } => {
                atrium_core::AtriumError::Conflict(format!("workspace slug already exists: {slug}"))
            }
            ChatError::Validation(msg) => atrium_core::AtriumError::Validation(msg),
            ChatError::Database(e) => atrium_core::AtriumError::Database(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
