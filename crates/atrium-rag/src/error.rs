use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("embedding API key not configured")]
    MissingApiKey,

    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding API error ({status}): {message}")]
    Embedding { status: u16, message: String },

    #[error("embedding count mismatch: sent {sent}, received {received}")]
    CountMismatch { sent: usize, received: usize },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl From<RagError> for atrium_core::AtriumError {
    fn from(e: RagError) -> Self {
        match e {
            RagError::Database(e) => atrium_core::AtriumError::Database(e.to_string()),
            other => atrium_core::AtriumError::Upstream(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
