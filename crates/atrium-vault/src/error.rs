use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("provider key not found: {id}")]
    NotFound { id: String },

    #[error("no active key for provider: {provider}")]
    NoActiveKey { provider: String },

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl From<VaultError> for atrium_core::AtriumError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::NotFound { id } => atrium_core::AtriumError::NotFound {
                resource: "provider key",
                id,
            },
            VaultError::NoActiveKey { provider } => atrium_core::AtriumError::NotFound {
                resource: "active provider key",
                id: provider,
            },
            VaultError::Database(e) => atrium_core::AtriumError::Database(e.to_string()),
            other => atrium_core::AtriumError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
