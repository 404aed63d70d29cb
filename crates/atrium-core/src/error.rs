use thiserror::Error;

/// Workspace-level error taxonomy. Subsystem crates define their own error
/// enums and convert into this type at the gateway boundary, where `code()`
/// and `http_status()` drive the wire response.
#[derive(Debug, Error)]
pub enum AtriumError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Permission denied: {0}")]
    Authorization(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Usage limit exceeded: {reason}")]
    QuotaExceeded { reason: String },

    #[error("Upstream provider error: {0}")]
    Upstream(String),

    #[error("File processing error: {0}")]
    FileProcessing(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AtriumError {
    /// Short error code string used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AtriumError::Config(_) => "CONFIG_ERROR",
            AtriumError::NotFound { .. } => "NOT_FOUND",
            AtriumError::Validation(_) => "VALIDATION_ERROR",
            AtriumError::Authentication(_) => "AUTHENTICATION_REQUIRED",
            AtriumError::Authorization(_) => "PERMISSION_DENIED",
            AtriumError::Conflict(_) => "CONFLICT",
            AtriumError::RateLimited { .. } => "RateLimitExceeded",
            AtriumError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            AtriumError::Upstream(_) => "UPSTREAM_ERROR",
            AtriumError::FileProcessing(_) => "FILE_PROCESSING_ERROR",
            AtriumError::Database(_) => "DATABASE_ERROR",
            AtriumError::Serialization(_) => "SERIALIZATION_ERROR",
            AtriumError::Io(_) => "IO_ERROR",
            AtriumError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the gateway maps this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            AtriumError::NotFound { .. } => 404,
            AtriumError::Validation(_) => 422,
            AtriumError::Authentication(_) => 401,
            AtriumError::Authorization(_) => 403,
            AtriumError::Conflict(_) => 409,
            AtriumError::RateLimited { .. } => 429,
            AtriumError::QuotaExceeded { .. } => 402,
            AtriumError::Upstream(_) => 502,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, AtriumError>;
