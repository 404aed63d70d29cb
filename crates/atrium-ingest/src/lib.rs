pub mod chunker;
pub mod db;
pub mod error;
pub mod extract;
pub mod files;
pub mod pipeline;
pub mod reaper;
pub mod types;

pub use chunker::{TextChunk, TextChunker};
pub use error::IngestError;
pub use files::FileStore;
pub use pipeline::IngestionPipeline;
pub use reaper::IngestionReaper;
pub use types::{FileStatus, FileType, KnowledgeFile};
