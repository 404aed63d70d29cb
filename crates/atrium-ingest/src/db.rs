use rusqlite::Connection;

use crate::error::Result;

/// Initialise the knowledge_files table and its indexes.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS knowledge_files (
            id                     TEXT PRIMARY KEY,
            assistant_id           TEXT NOT NULL,
            workspace_id           TEXT,
            filename               TEXT NOT NULL,
            file_type              TEXT NOT NULL,
            file_path              TEXT NOT NULL,
            size_bytes             INTEGER NOT NULL DEFAULT 0,
            chunk_count            INTEGER NOT NULL DEFAULT 0,
            status                 TEXT NOT NULL DEFAULT 'pending',
            attempt_count          INTEGER NOT NULL DEFAULT 0,
            max_attempts           INTEGER NOT NULL DEFAULT 3,
            processing_started_at  TEXT,
            next_retry_at          TEXT,
            last_error             TEXT,
            error_message          TEXT,
            created_at             TEXT NOT NULL,
            updated_at             TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_knowledge_files_assistant
            ON knowledge_files(assistant_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_knowledge_files_retry
            ON knowledge_files(status, next_retry_at);",
    )?;
    Ok(())
}
