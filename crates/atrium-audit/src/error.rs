use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<AuditError> for atrium_core::AtriumError {
    fn from(e: AuditError) -> Self {
        atrium_core::AtriumError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AuditError>;
