use rusqlite::Connection;

use crate::error::Result;

/// Initialise the provider_keys table.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS provider_keys (
            id              TEXT PRIMARY KEY,
            provider        TEXT NOT NULL,
            name            TEXT NOT NULL,
            encrypted_key   TEXT NOT NULL,
            is_active       INTEGER NOT NULL DEFAULT 1,
            is_default      INTEGER NOT NULL DEFAULT 0,
            last_used_at    TEXT,
            last_tested_at  TEXT,
            test_status     TEXT NOT NULL DEFAULT 'untested',
            test_error      TEXT,
            rotated_from_id TEXT REFERENCES provider_keys(id),
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_provider_keys_provider
            ON provider_keys(provider, is_active, is_default);",
    )?;
    Ok(())
}
