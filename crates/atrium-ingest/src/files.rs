use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{IngestError, Result};
use crate::types::{FileStatus, FileType, KnowledgeFile};

/// Retry delays in minutes for attempts 1, 2, 3+.
const BACKOFF_MINUTES: [i64; 3] = [5, 15, 45];

/// Delay before the next retry after `attempt_count` attempts.
pub fn backoff_minutes(attempt_count: u32) -> i64 {
    let idx = (attempt_count.saturating_sub(1) as usize).min(BACKOFF_MINUTES.len() - 1);
    BACKOFF_MINUTES[idx]
}

const SELECT_COLS: &str = "id, assistant_id, workspace_id, filename, file_type, file_path,
        size_bytes, chunk_count, status, attempt_count, max_attempts,
        processing_started_at, next_retry_at, last_error, error_message,
        created_at, updated_at";

/// Persistence for knowledge-file records and their lifecycle transitions.
///
/// Attempt bookkeeping is written before any work begins, so a crash mid-
/// extract leaves the record visibly stale for the reaper to reclaim.
pub struct FileStore {
    db: Arc<Mutex<Connection>>,
}

impl FileStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn create(
        &self,
        assistant_id: &str,
        workspace_id: Option<&str>,
        filename: &str,
        file_type: FileType,
        file_path: &str,
        size_bytes: u64,
    ) -> Result<KnowledgeFile> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO knowledge_files
             (id, assistant_id, workspace_id, filename, file_type, file_path,
              size_bytes, status, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,'pending',?8,?8)",
            rusqlite::params![
                id,
                assistant_id,
                workspace_id,
                filename,
                file_type.to_string(),
                file_path,
                size_bytes,
                now
            ],
        )?;
        get_file(&db, &id)
    }

    pub fn get(&self, id: &str) -> Result<KnowledgeFile> {
        let db = self.db.lock().unwrap();
        get_file(&db, id)
    }

    pub fn list_for_assistant(&self, assistant_id: &str) -> Result<Vec<KnowledgeFile>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {SELECT_COLS} FROM knowledge_files
             WHERE assistant_id = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(rusqlite::params![assistant_id], row_to_file)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn delete_row(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM knowledge_files WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(IngestError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Begin an attempt: bump the counter, stamp the start time, clear retry
    /// scheduling, and move to `processing`. Persisted before any work so a
    /// crash leaves a reclaimable record.
    #[instrument(skip(self), fields(file_id = %id))]
    pub fn register_attempt(&self, id: &str) -> Result<KnowledgeFile> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE knowledge_files
             SET attempt_count = attempt_count + 1,
                 processing_started_at = ?1,
                 next_retry_at = NULL,
                 last_error = NULL,
                 status = 'processing',
                 updated_at = ?1
             WHERE id = ?2",
            rusqlite::params![now, id],
        )?;
        if n == 0 {
            return Err(IngestError::NotFound { id: id.to_string() });
        }
        get_file(&db, id)
    }

    /// Extraction finished; embedding and vector writes are underway.
    pub fn set_indexing(&self, id: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE knowledge_files SET status = 'indexing', updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, id],
        )?;
        Ok(())
    }

    /// Terminal success: record the chunk count and clear error state.
    pub fn mark_ready(&self, id: &str, chunk_count: usize) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE knowledge_files
             SET status = 'ready', chunk_count = ?1, next_retry_at = NULL,
                 last_error = NULL, error_message = NULL, updated_at = ?2
             WHERE id = ?3",
            rusqlite::params![chunk_count as i64, now, id],
        )?;
        Ok(())
    }

    /// Attempt failed: schedule a retry with backoff, or move to `failed`
    /// once attempts are exhausted.
    #[instrument(skip(self, error), fields(file_id = %id))]
    pub fn mark_retry_or_failed(&self, id: &str, error: &str) -> Result<KnowledgeFile> {
        let error: String = error.chars().take(500).collect();
        let db = self.db.lock().unwrap();
        let file = get_file(&db, id)?;
        let now = chrono::Utc::now();

        if file.attempt_count >= file.max_attempts {
            db.execute(
                "UPDATE knowledge_files
                 SET status = 'failed', error_message = ?1, last_error = ?1,
                     next_retry_at = NULL, updated_at = ?2
                 WHERE id = ?3",
                rusqlite::params![error, now.to_rfc3339(), id],
            )?;
            warn!(file_id = %id, attempts = file.attempt_count, "file failed after max attempts");
        } else {
            let retry_at = now + chrono::Duration::minutes(backoff_minutes(file.attempt_count));
            db.execute(
                "UPDATE knowledge_files
                 SET status = 'pending', error_message = ?1, last_error = ?1,
                     next_retry_at = ?2, updated_at = ?3
                 WHERE id = ?4",
                rusqlite::params![error, retry_at.to_rfc3339(), now.to_rfc3339(), id],
            )?;
            info!(
                file_id = %id,
                attempt = file.attempt_count,
                retry_in_minutes = backoff_minutes(file.attempt_count),
                "file retry scheduled"
            );
        }
        get_file(&db, id)
    }

    /// Reset for a manual reprocess: due immediately.
    pub fn reset_for_reprocess(&self, id: &str) -> Result<KnowledgeFile> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE knowledge_files
             SET status = 'pending', next_retry_at = ?1,
                 last_error = 'Manual reprocess requested', updated_at = ?1
             WHERE id = ?2",
            rusqlite::params![now, id],
        )?;
        if n == 0 {
            return Err(IngestError::NotFound { id: id.to_string() });
        }
        get_file(&db, id)
    }

    /// Records stuck in `processing`/`indexing` since before `cutoff`.
    /// Null `processing_started_at` falls back to `created_at`.
    pub fn stale_records(&self, cutoff: &str) -> Result<Vec<KnowledgeFile>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {SELECT_COLS} FROM knowledge_files
             WHERE status IN ('processing', 'indexing')
               AND COALESCE(processing_started_at, created_at) < ?1"
        ))?;
        let rows = stmt.query_map(rusqlite::params![cutoff], row_to_file)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Demote a stale record to `pending` with a backoff deadline, or to
    /// `failed` when its attempts are spent. Does not bump the attempt
    /// counter — the stuck attempt was counted when it registered.
    pub fn reclaim(&self, id: &str) -> Result<KnowledgeFile> {
        let db = self.db.lock().unwrap();
        let file = get_file(&db, id)?;
        let now = chrono::Utc::now();

        if file.attempt_count >= file.max_attempts {
            db.execute(
                "UPDATE knowledge_files
                 SET status = 'failed',
                     error_message = COALESCE(last_error, 'Processing timed out after max attempts'),
                     last_error = COALESCE(last_error, 'Processing timed out after max attempts'),
                     next_retry_at = NULL, updated_at = ?1
                 WHERE id = ?2",
                rusqlite::params![now.to_rfc3339(), id],
            )?;
            warn!(file_id = %id, "stale file failed after max attempts");
        } else {
            let retry_at = now + chrono::Duration::minutes(backoff_minutes(file.attempt_count));
            db.execute(
                "UPDATE knowledge_files
                 SET status = 'pending', processing_started_at = NULL,
                     next_retry_at = ?1, updated_at = ?2
                 WHERE id = ?3",
                rusqlite::params![retry_at.to_rfc3339(), now.to_rfc3339(), id],
            )?;
            info!(file_id = %id, attempt = file.attempt_count, "stale file reclaimed");
        }
        get_file(&db, id)
    }

    /// Pending records whose retry deadline has arrived, oldest first.
    pub fn due_retries(&self, now: &str) -> Result<Vec<KnowledgeFile>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {SELECT_COLS} FROM knowledge_files
             WHERE status = 'pending'
               AND next_retry_at IS NOT NULL
               AND next_retry_at <= ?1
               AND attempt_count < max_attempts
             ORDER BY next_retry_at"
        ))?;
        let rows = stmt.query_map(rusqlite::params![now], row_to_file)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn get_file(db: &Connection, id: &str) -> Result<KnowledgeFile> {
    match db.query_row(
        &format!("SELECT {SELECT_COLS} FROM knowledge_files WHERE id = ?1"),
        [id],
        row_to_file,
    ) {
        Ok(f) => Ok(f),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            Err(IngestError::NotFound { id: id.to_string() })
        }
        Err(e) => Err(IngestError::Database(e)),
    }
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<KnowledgeFile> {
    let type_str: String = row.get(4)?;
    let status_str: String = row.get(8)?;
    Ok(KnowledgeFile {
        id: row.get(0)?,
        assistant_id: row.get(1)?,
        workspace_id: row.get(2)?,
        filename: row.get(3)?,
        file_type: type_str.parse().unwrap_or(FileType::Txt),
        file_path: row.get(5)?,
        size_bytes: row.get::<_, i64>(6)? as u64,
        chunk_count: row.get::<_, i64>(7)? as u32,
        status: status_str.parse().unwrap_or(FileStatus::Pending),
        attempt_count: row.get::<_, i64>(9)? as u32,
        max_attempts: row.get::<_, i64>(10)? as u32,
        processing_started_at: row.get(11)?,
        next_retry_at: row.get(12)?,
        last_error: row.get(13)?,
        error_message: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> FileStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        FileStore::new(Arc::new(Mutex::new(conn)))
    }

    fn seed(store: &FileStore) -> KnowledgeFile {
        store
            .create("a-1", None, "doc.pdf", FileType::Pdf, "/tmp/doc.pdf", 1024)
            .unwrap()
    }

    #[test]
    fn backoff_table() {
        assert_eq!(backoff_minutes(1), 5);
        assert_eq!(backoff_minutes(2), 15);
        assert_eq!(backoff_minutes(3), 45);
        assert_eq!(backoff_minutes(7), 45);
    }

    #[test]
    fn new_files_start_pending() {
        let store = store();
        let file = seed(&store);
        assert_eq!(file.status, FileStatus::Pending);
        assert_eq!(file.attempt_count, 0);
        assert_eq!(file.max_attempts, 3);
    }

    #[test]
    fn register_attempt_stamps_bookkeeping() {
        let store = store();
        let file = seed(&store);
        let file = store.register_attempt(&file.id).unwrap();
        assert_eq!(file.status, FileStatus::Processing);
        assert_eq!(file.attempt_count, 1);
        assert!(file.processing_started_at.is_some());
        assert!(file.next_retry_at.is_none());
    }

    #[test]
    fn failure_schedules_retry_with_backoff() {
        let store = store();
        let file = seed(&store);
        store.register_attempt(&file.id).unwrap();
        let file = store.mark_retry_or_failed(&file.id, "extractor exploded").unwrap();

        assert_eq!(file.status, FileStatus::Pending);
        assert_eq!(file.attempt_count, 1);
        let retry_at = file.next_retry_at.clone().unwrap();
        assert!(retry_at >= file.created_at);
        assert_eq!(file.error_message.as_deref(), Some("extractor exploded"));
    }

    #[test]
    fn exhausted_attempts_fail_terminally() {
        let store = store();
        let file = seed(&store);
        for _ in 0..3 {
            store.register_attempt(&file.id).unwrap();
            store.mark_retry_or_failed(&file.id, "still broken").unwrap();
        }
        let file = store.get(&file.id).unwrap();
        assert_eq!(file.status, FileStatus::Failed);
        assert_eq!(file.attempt_count, 3);
        assert!(file.next_retry_at.is_none());
        assert!(file.error_message.is_some());

        // A failed file never shows up as a due retry.
        let due = store.due_retries(&chrono::Utc::now().to_rfc3339()).unwrap();
        assert!(due.is_empty());
    }

    #[test]
    fn success_clears_error_state() {
        let store = store();
        let file = seed(&store);
        store.register_attempt(&file.id).unwrap();
        store.mark_retry_or_failed(&file.id, "transient").unwrap();
        store.register_attempt(&file.id).unwrap();
        store.mark_ready(&file.id, 12).unwrap();

        let file = store.get(&file.id).unwrap();
        assert_eq!(file.status, FileStatus::Ready);
        assert_eq!(file.chunk_count, 12);
        assert_eq!(file.attempt_count, 2);
        assert!(file.error_message.is_none());
        assert!(file.next_retry_at.is_none());
    }

    #[test]
    fn stale_detection_uses_created_at_fallback() {
        let store = store();
        let file = seed(&store);
        store.register_attempt(&file.id).unwrap();

        // Nothing stale against a cutoff in the past.
        let past = (chrono::Utc::now() - chrono::Duration::minutes(15)).to_rfc3339();
        assert!(store.stale_records(&past).unwrap().is_empty());

        // Everything currently processing is stale against a future cutoff.
        let future = (chrono::Utc::now() + chrono::Duration::minutes(1)).to_rfc3339();
        let stale = store.stale_records(&future).unwrap();
        assert_eq!(stale.len(), 1);

        // Reclaim demotes to pending without consuming an attempt.
        let file = store.reclaim(&file.id).unwrap();
        assert_eq!(file.status, FileStatus::Pending);
        assert_eq!(file.attempt_count, 1);
        assert!(file.processing_started_at.is_none());
        assert!(file.next_retry_at.is_some());
    }

    #[test]
    fn reprocess_is_due_immediately() {
        let store = store();
        let file = seed(&store);
        store.register_attempt(&file.id).unwrap();
        store.mark_ready(&file.id, 5).unwrap();

        let file = store.reset_for_reprocess(&file.id).unwrap();
        assert_eq!(file.status, FileStatus::Pending);
        assert_eq!(file.last_error.as_deref(), Some("Manual reprocess requested"));

        let now = chrono::Utc::now().to_rfc3339();
        let due = store.due_retries(&now).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, file.id);
    }
}
