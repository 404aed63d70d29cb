use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::types::{Assistant, AssistantParams};

const SELECT_COLS: &str = "id, workspace_id, name, description, instructions, model,
        temperature, max_tokens, max_retrieval_chunks, max_context_tokens,
        avatar_url, is_deleted, created_at, updated_at";

fn validate_params(p: &AssistantParams) -> Result<()> {
    if p.name.trim().is_empty() {
        return Err(ChatError::Validation("assistant name is required".to_string()));
    }
    if !(0.0..=2.0).contains(&p.temperature) {
        return Err(ChatError::Validation(
            "temperature must be between 0 and 2".to_string(),
        ));
    }
    if !(100..=128_000).contains(&p.max_tokens) {
        return Err(ChatError::Validation(
            "max_tokens must be between 100 and 128000".to_string(),
        ));
    }
    if !(1..=20).contains(&p.max_retrieval_chunks) {
        return Err(ChatError::Validation(
            "max_retrieval_chunks must be between 1 and 20".to_string(),
        ));
    }
    if !(512..=16_000).contains(&p.max_context_tokens) {
        return Err(ChatError::Validation(
            "max_context_tokens must be between 512 and 16000".to_string(),
        ));
    }
    Ok(())
}

/// Assistant persistence. Deletion is soft by default; a hard delete removes
/// the row and detaches its conversations, preserving their history.
pub struct AssistantStore {
    db: Arc<Mutex<Connection>>,
}

impl AssistantStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, params), fields(name = %params.name))]
    pub fn create(&self, params: &AssistantParams) -> Result<Assistant> {
        validate_params(params)?;
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO assistants
             (id, workspace_id, name, description, instructions, model, temperature,
              max_tokens, max_retrieval_chunks, max_context_tokens, avatar_url,
              is_deleted, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,0,?12,?12)",
            rusqlite::params![
                id,
                params.workspace_id,
                params.name.trim(),
                params.description,
                params.instructions,
                params.model,
                params.temperature,
                params.max_tokens,
                params.max_retrieval_chunks,
                params.max_context_tokens,
                params.avatar_url,
                now
            ],
        )?;
        info!(assistant_id = %id, "assistant created");
        get_assistant(&db, &id, true)
    }

    /// Fetch a live assistant. Soft-deleted rows read as missing unless
    /// `include_deleted`.
    pub fn get(&self, id: &str, include_deleted: bool) -> Result<Assistant> {
        let db = self.db.lock().unwrap();
        get_assistant(&db, id, include_deleted)
    }

    pub fn list(&self, workspace_id: Option<&str>, include_deleted: bool) -> Result<Vec<Assistant>> {
        let db = self.db.lock().unwrap();
        let mut sql = format!("SELECT {SELECT_COLS} FROM assistants");
        let mut clauses = Vec::new();
        if !include_deleted {
            clauses.push("is_deleted = 0".to_string());
        }
        if workspace_id.is_some() {
            clauses.push("workspace_id = ?1".to_string());
        }
        if !clauses.is_empty() {
            sql.push_str(&format!(" WHERE {}", clauses.join(" AND ")));
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut stmt = db.prepare(&sql)?;
        let rows = match workspace_id {
            Some(ws) => stmt.query_map(rusqlite::params![ws], row_to_assistant)?,
            None => stmt.query_map([], row_to_assistant)?,
        };
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn update(&self, id: &str, params: &AssistantParams) -> Result<Assistant> {
        validate_params(params)?;
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE assistants
             SET workspace_id = ?1, name = ?2, description = ?3, instructions = ?4,
                 model = ?5, temperature = ?6, max_tokens = ?7,
                 max_retrieval_chunks = ?8, max_context_tokens = ?9,
                 avatar_url = ?10, updated_at = ?11
             WHERE id = ?12 AND is_deleted = 0",
            rusqlite::params![
                params.workspace_id,
                params.name.trim(),
                params.description,
                params.instructions,
                params.model,
                params.temperature,
                params.max_tokens,
                params.max_retrieval_chunks,
                params.max_context_tokens,
                params.avatar_url,
                now,
                id
            ],
        )?;
        if n == 0 {
            return Err(ChatError::AssistantNotFound { id: id.to_string() });
        }
        get_assistant(&db, id, false)
    }

    /// Hide from listings; recoverable via `restore`.
    pub fn soft_delete(&self, id: &str) -> Result<()> {
        self.set_deleted(id, true)
    }

    pub fn restore(&self, id: &str) -> Result<()> {
        self.set_deleted(id, false)
    }

    fn set_deleted(&self, id: &str, deleted: bool) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE assistants SET is_deleted = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![deleted, now, id],
        )?;
        if n == 0 {
            return Err(ChatError::AssistantNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Remove the row permanently. Conversations keep their history with a
    /// detached assistant reference; the caller is responsible for dropping
    /// the assistant's vector collection and files.
    pub fn hard_delete(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE conversations SET assistant_id = NULL WHERE assistant_id = ?1",
            [id],
        )?;
        let n = db.execute("DELETE FROM assistants WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(ChatError::AssistantNotFound { id: id.to_string() });
        }
        info!(assistant_id = %id, "assistant hard-deleted");
        Ok(())
    }
}

fn get_assistant(db: &Connection, id: &str, include_deleted: bool) -> Result<Assistant> {
    let result = db.query_row(
        &format!("SELECT {SELECT_COLS} FROM assistants WHERE id = ?1"),
        [id],
        row_to_assistant,
    );
    match result {
        Ok(a) if a.is_deleted && !include_deleted => {
            Err(ChatError::AssistantNotFound { id: id.to_string() })
        }
        Ok(a) => Ok(a),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            Err(ChatError::AssistantNotFound { id: id.to_string() })
        }
        Err(e) => Err(ChatError::Database(e)),
    }
}

fn row_to_assistant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Assistant> {
    Ok(Assistant {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        instructions: row.get(4)?,
        model: row.get(5)?,
        temperature: row.get(6)?,
        max_tokens: row.get::<_, i64>(7)? as u32,
        max_retrieval_chunks: row.get::<_, i64>(8)? as u32,
        max_context_tokens: row.get::<_, i64>(9)? as u32,
        avatar_url: row.get(10)?,
        is_deleted: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn params(name: &str) -> AssistantParams {
        AssistantParams {
            name: name.to_string(),
            description: String::new(),
            instructions: "You are helpful.".to_string(),
            model: "anthropic/claude-3.5-sonnet".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            max_retrieval_chunks: 5,
            max_context_tokens: 4000,
            avatar_url: None,
            workspace_id: None,
        }
    }

    fn store() -> AssistantStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        AssistantStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn create_validates_sampling_bounds() {
        let store = store();
        let mut bad = params("A");
        bad.temperature = 2.5;
        assert!(matches!(store.create(&bad), Err(ChatError::Validation(_))));

        let mut bad = params("A");
        bad.max_tokens = 10;
        assert!(store.create(&bad).is_err());

        let mut bad = params("A");
        bad.max_retrieval_chunks = 0;
        assert!(store.create(&bad).is_err());

        assert!(store.create(&params("A")).is_ok());
    }

    #[test]
    fn soft_delete_hides_but_restores() {
        let store = store();
        let a = store.create(&params("A")).unwrap();

        store.soft_delete(&a.id).unwrap();
        assert!(store.get(&a.id, false).is_err());
        assert!(store.get(&a.id, true).is_ok());
        assert!(store.list(None, false).unwrap().is_empty());
        assert_eq!(store.list(None, true).unwrap().len(), 1);

        store.restore(&a.id).unwrap();
        assert!(store.get(&a.id, false).is_ok());
    }
}
