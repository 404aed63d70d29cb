use rusqlite::Connection;

use crate::error::Result;

/// Initialise the vector chunk table.
///
/// Collections are rows sharing a `collection` tag rather than separate
/// tables, which keeps collection drops and per-file deletes single
/// statements. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS vector_chunks (
            collection  TEXT NOT NULL,
            chunk_id    TEXT NOT NULL,
            file_id     TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text        TEXT NOT NULL,
            metadata    TEXT NOT NULL,
            vector      BLOB NOT NULL,
            PRIMARY KEY (collection, chunk_id)
        );
        CREATE INDEX IF NOT EXISTS idx_vector_chunks_file
            ON vector_chunks(collection, file_id);",
    )?;
    Ok(())
}
