use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("user not found: {id}")]
    NotFound { id: String },

    #[error("user with email already exists: {email}")]
    EmailExists { email: String },

    #[error("{0}")]
    WeakPassword(String),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl From<AuthError> for atrium_core::AtriumError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials => {
                atrium_core::AtriumError::Authentication("invalid credentials".to_string())
            }
            AuthError::NotFound { id } => atrium_core::AtriumError::NotFound {
                resource: "user",
                id,
            },
            AuthError::EmailExists { email } => atrium_core::AtriumError::Conflict(format!(
                "user with email already exists: {email}"
            )),
            AuthError::WeakPassword(msg) => atrium_core::AtriumError::Validation(msg),
            AuthError::Hash(msg) => atrium_core::AtriumError::Internal(msg),
            AuthError::Database(e) => atrium_core::AtriumError::Database(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
