use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl From<QuotaError> for atrium_core::AtriumError {
    fn from(e: QuotaError) -> Self {
        atrium_core::AtriumError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QuotaError>;
