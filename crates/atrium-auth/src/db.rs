use rusqlite::Connection;

use crate::error::Result;

/// Initialise user and API-key tables.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            email         TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            name          TEXT NOT NULL,
            role          TEXT NOT NULL DEFAULT 'user',
            is_active     INTEGER NOT NULL DEFAULT 1,
            is_verified   INTEGER NOT NULL DEFAULT 0,
            last_login_at TEXT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS user_api_keys (
            id           TEXT PRIMARY KEY,
            user_id      TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name         TEXT NOT NULL,
            key_hash     TEXT NOT NULL,
            key_prefix   TEXT NOT NULL,
            expires_at   TEXT,
            is_active    INTEGER NOT NULL DEFAULT 1,
            last_used_at TEXT,
            created_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_user_api_keys_prefix
            ON user_api_keys(key_prefix);
        CREATE INDEX IF NOT EXISTS idx_user_api_keys_user
            ON user_api_keys(user_id);",
    )?;
    Ok(())
}
