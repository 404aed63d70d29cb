use rusqlite::Connection;

use crate::error::Result;

/// Initialise workspace, assistant, conversation, and message tables.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS workspaces (
            id         TEXT PRIMARY KEY,
            name       TEXT NOT NULL,
            slug       TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS assistants (
            id                   TEXT PRIMARY KEY,
            workspace_id         TEXT,
            name                 TEXT NOT NULL,
            description          TEXT NOT NULL DEFAULT '',
            instructions         TEXT NOT NULL DEFAULT '',
            model                TEXT NOT NULL,
            temperature          REAL NOT NULL DEFAULT 0.7,
            max_tokens           INTEGER NOT NULL DEFAULT 4096,
            max_retrieval_chunks INTEGER NOT NULL DEFAULT 5,
            max_context_tokens   INTEGER NOT NULL DEFAULT 4000,
            avatar_url           TEXT,
            is_deleted           INTEGER NOT NULL DEFAULT 0,
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS conversations (
            id           TEXT PRIMARY KEY,
            assistant_id TEXT,
            user_id      TEXT,
            workspace_id TEXT,
            title        TEXT NOT NULL DEFAULT 'New Conversation',
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            role             TEXT NOT NULL,
            content          TEXT NOT NULL,
            model            TEXT,
            tokens_used      TEXT,
            feedback         TEXT,
            feedback_reason  TEXT,
            feedback_context TEXT,
            created_at       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_assistants_workspace
            ON assistants(workspace_id);
        CREATE INDEX IF NOT EXISTS idx_conversations_assistant
            ON conversations(assistant_id);
        CREATE INDEX IF NOT EXISTS idx_conversations_user
            ON conversations(user_id, updated_at DESC);
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_feedback
            ON messages(feedback);",
    )?;
    Ok(())
}
