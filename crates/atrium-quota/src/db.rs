use rusqlite::Connection;

use crate::error::Result;

/// Initialise quota and usage-log tables.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS usage_quotas (
            id                      TEXT PRIMARY KEY,
            scope                   TEXT NOT NULL,
            scope_id                TEXT,
            daily_cost_limit_usd    REAL,
            monthly_cost_limit_usd  REAL,
            daily_token_limit       INTEGER,
            monthly_token_limit     INTEGER,
            requests_per_minute     INTEGER,
            requests_per_hour       INTEGER,
            alert_threshold_percent INTEGER NOT NULL DEFAULT 80,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL,
            UNIQUE(scope, scope_id)
        );
        CREATE TABLE IF NOT EXISTS usage_logs (
            id                TEXT PRIMARY KEY,
            assistant_id      TEXT,
            conversation_id   TEXT,
            message_id        TEXT,
            model             TEXT NOT NULL,
            prompt_tokens     INTEGER NOT NULL DEFAULT 0,
            completion_tokens INTEGER NOT NULL DEFAULT 0,
            total_tokens      INTEGER NOT NULL DEFAULT 0,
            cost_usd          REAL NOT NULL DEFAULT 0,
            created_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_usage_logs_created
            ON usage_logs(created_at);
        CREATE INDEX IF NOT EXISTS idx_usage_logs_assistant
            ON usage_logs(assistant_id);
        CREATE INDEX IF NOT EXISTS idx_usage_logs_conversation
            ON usage_logs(conversation_id);",
    )?;
    Ok(())
}
