use std::path::{Path, PathBuf};

use tracing::{error, info, instrument};
use uuid::Uuid;

use atrium_rag::{Embedder, VectorStore};

use crate::chunker::TextChunker;
use crate::error::{IngestError, Result};
use crate::extract::{check_magic, extract_text, SNIFF_LEN};
use crate::files::FileStore;
use crate::types::{FileType, KnowledgeFile};

/// Durable extract → chunk → embed → store pipeline for uploaded files.
///
/// `process_file` persists attempt bookkeeping before touching the file, so
/// every failure mode — including a crash — resolves to a row state the
/// reaper can act on.
pub struct IngestionPipeline {
    files: FileStore,
    vectors: VectorStore,
    embedder: Box<dyn Embedder>,
    chunker: TextChunker,
    upload_dir: PathBuf,
    max_file_size_bytes: u64,
}

impl IngestionPipeline {
    pub fn new(
        files: FileStore,
        vectors: VectorStore,
        embedder: Box<dyn Embedder>,
        upload_dir: impl Into<PathBuf>,
        max_file_size_bytes: u64,
    ) -> Self {
        Self {
            files,
            vectors,
            embedder,
            chunker: TextChunker::new(),
            upload_dir: upload_dir.into(),
            max_file_size_bytes,
        }
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn vectors(&self) -> &VectorStore {
        &self.vectors
    }

    /// Validate an upload: extension, size bounds, and a magic sniff of the
    /// first 8 KiB against the declared type.
    pub fn validate_upload(&self, filename: &str, bytes: &[u8]) -> Result<FileType> {
        if filename.is_empty() {
            return Err(IngestError::InvalidFile("Filename is required".to_string()));
        }
        let file_type = FileType::from_filename(filename).ok_or_else(|| {
            IngestError::InvalidFile(
                "File type not allowed. Allowed types: docx, md, pdf, txt".to_string(),
            )
        })?;
        if bytes.is_empty() {
            return Err(IngestError::InvalidFile("File is empty".to_string()));
        }
        if bytes.len() as u64 > self.max_file_size_bytes {
            return Err(IngestError::InvalidFile(format!(
                "File too large. Maximum size: {}MB",
                self.max_file_size_bytes / (1024 * 1024)
            )));
        }
        let head = &bytes[..bytes.len().min(SNIFF_LEN)];
        check_magic(head, file_type)?;
        Ok(file_type)
    }

    /// Validate, persist to disk under a per-assistant directory, and create
    /// the `pending` record. Processing is dispatched separately.
    #[instrument(skip(self, bytes))]
    pub fn upload(
        &self,
        assistant_id: &str,
        workspace_id: Option<&str>,
        filename: &str,
        bytes: &[u8],
    ) -> Result<KnowledgeFile> {
        let file_type = self.validate_upload(filename, bytes)?;

        let dir = self.upload_dir.join(assistant_id);
        std::fs::create_dir_all(&dir)?;
        let stored_name = format!("{}.{}", Uuid::new_v4(), file_type.extension());
        let path = dir.join(stored_name);
        std::fs::write(&path, bytes)?;

        let file = self.files.create(
            assistant_id,
            workspace_id,
            filename,
            file_type,
            &path.to_string_lossy(),
            bytes.len() as u64,
        )?;
        info!(file_id = %file.id, size = bytes.len(), "file uploaded");
        Ok(file)
    }

    /// Run one processing attempt for a file.
    ///
    /// Returns `Ok(true)` on success. Attempt-level failures are absorbed
    /// into the row state (retry scheduling or terminal failure) and return
    /// `Ok(false)`; only a missing record surfaces as `Err`.
    #[instrument(skip(self))]
    pub async fn process_file(&self, file_id: &str) -> Result<bool> {
        let file = self.files.register_attempt(file_id)?;

        match self.run_attempt(&file).await {
            Ok(chunk_count) => {
                self.files.mark_ready(file_id, chunk_count)?;
                info!(
                    file_id = %file_id,
                    attempt = file.attempt_count,
                    chunk_count,
                    "file processing succeeded"
                );
                Ok(true)
            }
            Err(e) => {
                error!(
                    file_id = %file_id,
                    attempt = file.attempt_count,
                    error = %e,
                    "file processing failed"
                );
                self.files.mark_retry_or_failed(file_id, &e.to_string())?;
                Ok(false)
            }
        }
    }

    async fn run_attempt(&self, file: &KnowledgeFile) -> Result<usize> {
        let text = extract_text(Path::new(&file.file_path), file.file_type)?;
        if text.trim().is_empty() {
            return Err(IngestError::Processing(
                "No text content found in file".to_string(),
            ));
        }

        let chunks = self.chunker.chunk_text(&text);
        if chunks.is_empty() {
            return Err(IngestError::Processing(
                "Failed to create text chunks".to_string(),
            ));
        }

        self.files.set_indexing(&file.id)?;

        let chunk_texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&chunk_texts).await?;

        let metadatas: Vec<serde_json::Value> = chunks
            .iter()
            .map(|c| {
                serde_json::json!({
                    "filename": file.filename,
                    "token_count": c.token_count,
                })
            })
            .collect();

        self.vectors
            .upsert(&file.assistant_id, &file.id, &chunk_texts, &vectors, &metadatas)?;

        Ok(chunks.len())
    }

    /// Remove a file entirely: vector chunks, the stored blob, and the row.
    pub fn delete_file(&self, file_id: &str) -> Result<()> {
        let file = self.files.get(file_id)?;
        self.vectors.delete_by_file(&file.assistant_id, file_id)?;
        let path = Path::new(&file.file_path);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        self.files.delete_row(file_id)?;
        info!(file_id = %file_id, "file deleted");
        Ok(())
    }

    /// Clear a file's chunks and queue it for an immediate retry. The next
    /// reaper tick picks it up.
    pub fn reprocess(&self, file_id: &str) -> Result<KnowledgeFile> {
        let file = self.files.get(file_id)?;
        self.vectors.delete_by_file(&file.assistant_id, file_id)?;
        self.files.reset_for_reprocess(file_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use rusqlite::Connection;

    use atrium_rag::RagError;

    use super::*;
    use crate::types::FileStatus;

    struct HashEmbedder;

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, texts: &[String]) -> atrium_rag::error::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _texts: &[String]) -> atrium_rag::error::Result<Vec<Vec<f32>>> {
            Err(RagError::Embedding {
                status: 503,
                message: "provider down".to_string(),
            })
        }
    }

    fn pipeline_with(embedder: Box<dyn Embedder>, dir: &Path) -> IngestionPipeline {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        atrium_rag::db::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        IngestionPipeline::new(
            FileStore::new(db.clone()),
            VectorStore::new(db),
            embedder,
            dir,
            1024 * 1024,
        )
    }

    #[test]
    fn validation_rejects_bad_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(Box::new(HashEmbedder), dir.path());

        assert!(pipeline.validate_upload("notes.txt", b"").is_err());
        assert!(pipeline.validate_upload("data.csv", b"a,b,c").is_err());
        // pdf extension, docx (zip) magic
        let err = pipeline
            .validate_upload("fake.pdf", b"PK\x03\x04zipzip")
            .unwrap_err();
        assert!(err.to_string().contains("does not match extension"));
        assert_eq!(
            pipeline.validate_upload("ok.md", b"# title").unwrap(),
            FileType::Md
        );
    }

    #[tokio::test]
    async fn txt_upload_processes_to_ready() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(Box::new(HashEmbedder), dir.path());

        let file = pipeline
            .upload("a-1", None, "notes.txt", b"Some meaningful notes about the project.")
            .unwrap();
        assert_eq!(file.status, FileStatus::Pending);

        assert!(pipeline.process_file(&file.id).await.unwrap());

        let file = pipeline.files().get(&file.id).unwrap();
        assert_eq!(file.status, FileStatus::Ready);
        assert_eq!(file.attempt_count, 1);
        assert!(file.chunk_count > 0);
        assert!(file.error_message.is_none());
        // The store holds exactly chunk_count entries for this file.
        assert_eq!(pipeline.vectors().count("a-1").unwrap() as u32, file.chunk_count);
    }

    #[tokio::test]
    async fn empty_extraction_schedules_retry() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(Box::new(HashEmbedder), dir.path());

        let file = pipeline.upload("a-1", None, "blank.txt", b"   \n\t ").unwrap();
        assert!(!pipeline.process_file(&file.id).await.unwrap());

        let file = pipeline.files().get(&file.id).unwrap();
        assert_eq!(file.status, FileStatus::Pending);
        assert_eq!(file.attempt_count, 1);
        assert_eq!(
            file.error_message.as_deref(),
            Some("No text content found in file")
        );
        assert!(file.next_retry_at.is_some());
    }

    #[tokio::test]
    async fn embedder_outage_retries_then_fails() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(Box::new(FailingEmbedder), dir.path());

        let file = pipeline.upload("a-1", None, "notes.txt", b"real content here").unwrap();
        for _ in 0..3 {
            assert!(!pipeline.process_file(&file.id).await.unwrap());
        }

        let file = pipeline.files().get(&file.id).unwrap();
        assert_eq!(file.status, FileStatus::Failed);
        assert_eq!(file.attempt_count, 3);
        assert!(file.error_message.as_deref().unwrap().contains("provider down"));
        assert!(file.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn delete_removes_chunks_blob_and_row() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(Box::new(HashEmbedder), dir.path());

        let file = pipeline.upload("a-1", None, "notes.txt", b"delete me soon").unwrap();
        pipeline.process_file(&file.id).await.unwrap();
        let path = pipeline.files().get(&file.id).unwrap().file_path;

        pipeline.delete_file(&file.id).unwrap();
        assert!(!Path::new(&path).exists());
        assert_eq!(pipeline.vectors().count("a-1").unwrap(), 0);
        assert!(pipeline.files().get(&file.id).is_err());
    }

    #[tokio::test]
    async fn reprocess_clears_chunks_and_requeues() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(Box::new(HashEmbedder), dir.path());

        let file = pipeline.upload("a-1", None, "notes.txt", b"reprocess target").unwrap();
        pipeline.process_file(&file.id).await.unwrap();
        assert!(pipeline.vectors().count("a-1").unwrap() > 0);

        let file = pipeline.reprocess(&file.id).unwrap();
        assert_eq!(file.status, FileStatus::Pending);
        assert_eq!(pipeline.vectors().count("a-1").unwrap(), 0);
        assert!(file.next_retry_at.is_some());
    }
}
