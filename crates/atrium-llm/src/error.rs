use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider API key not configured")]
    MissingApiKey,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<LlmError> for atrium_core::AtriumError {
    fn from(e: LlmError) -> Self {
        atrium_core::AtriumError::Upstream(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
