use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::types::Workspace;

pub const DEFAULT_WORKSPACE_SLUG: &str = "default";

const SELECT_COLS: &str = "id, name, slug, created_at, updated_at";

/// Tenancy roots. A canonical default workspace is seeded at bootstrap and
/// backfills nullable workspace columns.
pub struct WorkspaceStore {
    db: Arc<Mutex<Connection>>,
}

impl WorkspaceStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Seed the canonical default workspace if missing. Idempotent.
    pub fn ensure_default(&self) -> Result<Workspace> {
        if let Some(ws) = self.get_by_slug(DEFAULT_WORKSPACE_SLUG)? {
            return Ok(ws);
        }
        let ws = self.create("Default Workspace", DEFAULT_WORKSPACE_SLUG)?;
        info!(workspace_id = %ws.id, "default workspace seeded");
        Ok(ws)
    }

    pub fn create(&self, name: &str, slug: &str) -> Result<Workspace> {
        if self.get_by_slug(slug)?.is_some() {
            return Err(ChatError::SlugExists {
                slug: slug.to_string(),
            });
        }
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO workspaces (id, name, slug, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?4)",
            rusqlite::params![id, name, slug, now],
        )?;
        get_workspace(&db, &id)
    }

    pub fn get(&self, id: &str) -> Result<Workspace> {
        let db = self.db.lock().unwrap();
        get_workspace(&db, id)
    }

    pub fn get_by_slug(&self, slug: &str) -> Result<Option<Workspace>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {SELECT_COLS} FROM workspaces WHERE slug = ?1"),
            rusqlite::params![slug],
            row_to_workspace,
        ) {
            Ok(ws) => Ok(Some(ws)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ChatError::Database(e)),
        }
    }

    pub fn list(&self) -> Result<Vec<Workspace>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {SELECT_COLS} FROM workspaces ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([], row_to_workspace)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Delete a workspace. Dependent records keep running with a null
    /// workspace id rather than disappearing.
    pub fn delete(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        for table in ["assistants", "conversations"] {
            db.execute(
                &format!("UPDATE {table} SET workspace_id = NULL WHERE workspace_id = ?1"),
                [id],
            )?;
        }
        let n = db.execute("DELETE FROM workspaces WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(ChatError::WorkspaceNotFound { id: id.to_string() });
        }
        Ok(())
    }
}

fn get_workspace(db: &Connection, id: &str) -> Result<Workspace> {
    match db.query_row(
        &format!("SELECT {SELECT_COLS} FROM workspaces WHERE id = ?1"),
        [id],
        row_to_workspace,
    ) {
        Ok(ws) => Ok(ws),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            Err(ChatError::WorkspaceNotFound { id: id.to_string() })
        }
        Err(e) => Err(ChatError::Database(e)),
    }
}

fn row_to_workspace(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> WorkspaceStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        WorkspaceStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn default_workspace_is_seeded_once() {
        let store = store();
        let a = store.ensure_default().unwrap();
        let b = store.ensure_default().unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.slug, "default");
    }

    #[test]
    fn slugs_are_unique() {
        let store = store();
        store.create("One", "team-one").unwrap();
        assert!(matches!(
            store.create("Other", "team-one"),
            Err(ChatError::SlugExists { .. })
        ));
    }
}
