pub mod composer;
pub mod db;
pub mod embedder;
pub mod error;
pub mod store;

pub use composer::{RagComposer, RetrievedChunk};
pub use embedder::{Embedder, EmbeddingClient};
pub use error::RagError;
pub use store::VectorStore;
