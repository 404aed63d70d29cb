use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("knowledge file not found: {id}")]
    NotFound { id: String },

    #[error("{0}")]
    InvalidFile(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("{0}")]
    Processing(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Rag(#[from] atrium_rag::RagError),
}

impl From<IngestError> for atrium_core::AtriumError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::NotFound { id } => atrium_core::AtriumError::NotFound {
                resource: "knowledge file",
                id,
            },
            IngestError::InvalidFile(msg) => atrium_core::AtriumError::Validation(msg),
            IngestError::Database(e) => atrium_core::AtriumError::Database(e.to_string()),
            IngestError::Io(e) => atrium_core::AtriumError::Io(e),
            IngestError::Rag(e) => e.into(),
            other => atrium_core::AtriumError::FileProcessing(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
