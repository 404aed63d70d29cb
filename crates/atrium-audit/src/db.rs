use rusqlite::Connection;

use crate::error::Result;

/// Initialise the audit_logs table and its indexes.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout. The table
/// is append-only: nothing in this crate issues UPDATE or DELETE against it.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS audit_logs (
            id            TEXT PRIMARY KEY,
            action        TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            resource_id   TEXT,
            actor         TEXT NOT NULL,
            actor_id      TEXT,
            ip_address    TEXT,
            user_agent    TEXT,
            details       TEXT,
            old_values    TEXT,
            new_values    TEXT,
            created_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_action
            ON audit_logs(action);
        CREATE INDEX IF NOT EXISTS idx_audit_resource
            ON audit_logs(resource_type, resource_id);
        CREATE INDEX IF NOT EXISTS idx_audit_created
            ON audit_logs(created_at DESC);",
    )?;
    Ok(())
}
