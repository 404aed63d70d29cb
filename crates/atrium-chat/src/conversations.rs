use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::instrument;
use uuid::Uuid;

use atrium_core::TokenUsage;

use crate::error::{ChatError, Result};
use crate::types::{
    Conversation, ConversationSummary, Message, MessageRole, DEFAULT_CONVERSATION_TITLE,
};

const CONV_COLS: &str = "id, assistant_id, user_id, workspace_id, title, created_at, updated_at";
const MSG_COLS: &str = "id, conversation_id, role, content, model, tokens_used,
        feedback, feedback_reason, feedback_context, created_at";

/// Conversation and message persistence with per-user ownership checks.
pub struct ConversationStore {
    db: Arc<Mutex<Connection>>,
}

impl ConversationStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Create a conversation under a live assistant.
    pub fn create(
        &self,
        assistant_id: &str,
        title: Option<&str>,
        user_id: Option<&str>,
        workspace_id: Option<&str>,
    ) -> Result<Conversation> {
        let db = self.db.lock().unwrap();

        let live: bool = db
            .query_row(
                "SELECT COUNT(*) > 0 FROM assistants WHERE id = ?1 AND is_deleted = 0",
                [assistant_id],
                |row| row.get(0),
            )
            .unwrap_or(false);
        if !live {
            return Err(ChatError::AssistantNotFound {
                id: assistant_id.to_string(),
            });
        }

        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO conversations
             (id, assistant_id, user_id, workspace_id, title, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?6)",
            rusqlite::params![
                id,
                assistant_id,
                user_id,
                workspace_id,
                title.unwrap_or(DEFAULT_CONVERSATION_TITLE),
                now
            ],
        )?;
        get_conversation(&db, &id)
    }

    /// Fetch with ownership enforcement: non-admin callers only see their own
    /// conversations, and a mismatch reads as not-found.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn get_for(
        &self,
        id: &str,
        caller_user_id: Option<&str>,
        is_admin: bool,
    ) -> Result<Conversation> {
        let db = self.db.lock().unwrap();
        let conversation = get_conversation(&db, id)?;
        if !is_admin {
            if let Some(caller) = caller_user_id {
                if conversation.user_id.as_deref() != Some(caller) {
                    return Err(ChatError::ConversationNotFound { id: id.to_string() });
                }
            }
        }
        Ok(conversation)
    }

    /// List with filters and ownership scoping. Returns (rows, total).
    pub fn list(
        &self,
        assistant_id: Option<&str>,
        caller_user_id: Option<&str>,
        is_admin: bool,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<ConversationSummary>, u64)> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(aid) = assistant_id {
            clauses.push("assistant_id = ?".to_string());
            args.push(Box::new(aid.to_string()));
        }
        if !is_admin {
            if let Some(caller) = caller_user_id {
                clauses.push("user_id = ?".to_string());
                args.push(Box::new(caller.to_string()));
            }
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let db = self.db.lock().unwrap();
        let total: u64 = db.query_row(
            &format!("SELECT COUNT(*) FROM conversations{where_sql}"),
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| row.get(0),
        )?;

        let limit = if limit == 0 { 50 } else { limit };
        let mut stmt = db.prepare(&format!(
            "SELECT {CONV_COLS},
                    (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = conversations.id)
             FROM conversations{where_sql}
             ORDER BY updated_at DESC LIMIT {limit} OFFSET {offset}"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| {
                Ok(ConversationSummary {
                    conversation: row_to_conversation(row)?,
                    message_count: row.get::<_, i64>(7)? as u64,
                })
            },
        )?;

        Ok((rows.filter_map(|r| r.ok()).collect(), total))
    }

    pub fn update_title(&self, id: &str, title: &str) -> Result<Conversation> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![title, now, id],
        )?;
        if n == 0 {
            return Err(ChatError::ConversationNotFound { id: id.to_string() });
        }
        get_conversation(&db, id)
    }

    /// Delete a conversation and, with it, every message it owns.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute("DELETE FROM messages WHERE conversation_id = ?1", [id])?;
        let n = tx.execute("DELETE FROM conversations WHERE id = ?1", [id])?;
        tx.commit()?;
        if n == 0 {
            return Err(ChatError::ConversationNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Append a message and bump the conversation's freshness.
    pub fn add_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        model: Option<&str>,
    ) -> Result<Message> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO messages (id, conversation_id, role, content, model, created_at)
             VALUES (?1,?2,?3,?4,?5,?6)",
            rusqlite::params![id, conversation_id, role.to_string(), content, model, now],
        )?;
        db.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, conversation_id],
        )?;
        get_message(&db, &id)
    }

    /// Write streamed content into a reserved assistant row.
    pub fn set_message_content(&self, message_id: &str, content: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE messages SET content = ?1 WHERE id = ?2",
            rusqlite::params![content, message_id],
        )?;
        if n == 0 {
            return Err(ChatError::MessageNotFound {
                id: message_id.to_string(),
            });
        }
        Ok(())
    }

    /// Finalize a completed assistant turn with its accounting.
    pub fn finalize_message(
        &self,
        message_id: &str,
        content: &str,
        usage: TokenUsage,
    ) -> Result<()> {
        let usage_json = serde_json::to_string(&usage).unwrap_or_default();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE messages SET content = ?1, tokens_used = ?2 WHERE id = ?3",
            rusqlite::params![content, usage_json, message_id],
        )?;
        if n == 0 {
            return Err(ChatError::MessageNotFound {
                id: message_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn get_message(&self, message_id: &str) -> Result<Message> {
        let db = self.db.lock().unwrap();
        get_message(&db, message_id)
    }

    /// All messages in a conversation, oldest first.
    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {MSG_COLS} FROM messages
             WHERE conversation_id = ?1 ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map(rusqlite::params![conversation_id], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Record end-user feedback on an assistant message.
    pub fn set_feedback(
        &self,
        message_id: &str,
        feedback: &str,
        reason: Option<&str>,
        context: Option<&str>,
    ) -> Result<Message> {
        if feedback != "up" && feedback != "down" {
            return Err(ChatError::Validation(
                "feedback must be 'up' or 'down'".to_string(),
            ));
        }
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE messages
             SET feedback = ?1, feedback_reason = ?2, feedback_context = ?3
             WHERE id = ?4",
            rusqlite::params![feedback, reason, context, message_id],
        )?;
        if n == 0 {
            return Err(ChatError::MessageNotFound {
                id: message_id.to_string(),
            });
        }
        get_message(&db, message_id)
    }
}

fn get_conversation(db: &Connection, id: &str) -> Result<Conversation> {
    match db.query_row(
        &format!("SELECT {CONV_COLS} FROM conversations WHERE id = ?1"),
        [id],
        row_to_conversation,
    ) {
        Ok(c) => Ok(c),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            Err(ChatError::ConversationNotFound { id: id.to_string() })
        }
        Err(e) => Err(ChatError::Database(e)),
    }
}

fn get_message(db: &Connection, id: &str) -> Result<Message> {
    match db.query_row(
        &format!("SELECT {MSG_COLS} FROM messages WHERE id = ?1"),
        [id],
        row_to_message,
    ) {
        Ok(m) => Ok(m),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            Err(ChatError::MessageNotFound { id: id.to_string() })
        }
        Err(e) => Err(ChatError::Database(e)),
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        assistant_id: row.get(1)?,
        user_id: row.get(2)?,
        workspace_id: row.get(3)?,
        title: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role_str: String = row.get(2)?;
    let usage_json: Option<String> = row.get(5)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: role_str.parse().unwrap_or(MessageRole::User),
        content: row.get(3)?,
        model: row.get(4)?,
        tokens_used: usage_json.and_then(|s| serde_json::from_str(&s).ok()),
        feedback: row.get(6)?,
        feedback_reason: row.get(7)?,
        feedback_context: row.get(8)?,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistants::AssistantStore;
    use crate::types::AssistantParams;

    fn stores() -> (ConversationStore, AssistantStore, String) {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        let assistants = AssistantStore::new(db.clone());
        let assistant = assistants
            .create(&AssistantParams {
                name: "Atlas".to_string(),
                description: String::new(),
                instructions: "You are helpful.".to_string(),
                model: "anthropic/claude-3.5-sonnet".to_string(),
                temperature: 0.7,
                max_tokens: 2048,
                max_retrieval_chunks: 5,
                max_context_tokens: 4000,
                avatar_url: None,
                workspace_id: None,
            })
            .unwrap();
        (ConversationStore::new(db), assistants, assistant.id)
    }

    #[test]
    fn create_requires_live_assistant() {
        let (conversations, assistants, assistant_id) = stores();
        assert!(conversations.create(&assistant_id, None, None, None).is_ok());

        assistants.soft_delete(&assistant_id).unwrap();
        assert!(matches!(
            conversations.create(&assistant_id, None, None, None),
            Err(ChatError::AssistantNotFound { .. })
        ));
        assert!(conversations.create("missing", None, None, None).is_err());
    }

    #[test]
    fn ownership_reads_as_not_found() {
        let (conversations, _, assistant_id) = stores();
        let conv = conversations
            .create(&assistant_id, None, Some("u-owner"), None)
            .unwrap();

        // Owner and admin both see it.
        assert!(conversations.get_for(&conv.id, Some("u-owner"), false).is_ok());
        assert!(conversations.get_for(&conv.id, Some("u-other"), true).is_ok());

        // A different non-admin caller gets not-found, not forbidden.
        assert!(matches!(
            conversations.get_for(&conv.id, Some("u-other"), false),
            Err(ChatError::ConversationNotFound { .. })
        ));
    }

    #[test]
    fn listing_scopes_non_admins_to_their_own() {
        let (conversations, _, assistant_id) = stores();
        conversations.create(&assistant_id, None, Some("u-1"), None).unwrap();
        conversations.create(&assistant_id, None, Some("u-2"), None).unwrap();

        let (rows, total) = conversations.list(None, Some("u-1"), false, 50, 0).unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].conversation.user_id.as_deref(), Some("u-1"));

        let (_, total) = conversations.list(None, Some("u-1"), true, 50, 0).unwrap();
        assert_eq!(total, 2);
    }

    #[test]
    fn messages_are_ordered_and_cascade_on_delete() {
        let (conversations, _, assistant_id) = stores();
        let conv = conversations.create(&assistant_id, None, None, None).unwrap();

        conversations
            .add_message(&conv.id, MessageRole::User, "first", None)
            .unwrap();
        conversations
            .add_message(&conv.id, MessageRole::Assistant, "second", Some("m"))
            .unwrap();

        let messages = conversations.list_messages(&conv.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].content, "second");

        conversations.delete(&conv.id).unwrap();
        assert!(conversations.list_messages(&conv.id).unwrap().is_empty());
    }

    #[test]
    fn finalize_fills_reserved_assistant_row() {
        let (conversations, _, assistant_id) = stores();
        let conv = conversations.create(&assistant_id, None, None, None).unwrap();
        let reserved = conversations
            .add_message(&conv.id, MessageRole::Assistant, "", Some("m"))
            .unwrap();
        assert!(reserved.content.is_empty());

        conversations
            .finalize_message(&reserved.id, "full reply", TokenUsage::new(10, 5))
            .unwrap();
        let message = conversations.get_message(&reserved.id).unwrap();
        assert_eq!(message.content, "full reply");
        assert_eq!(message.tokens_used.unwrap().total_tokens, 15);
    }

    #[test]
    fn feedback_validates_direction() {
        let (conversations, _, assistant_id) = stores();
        let conv = conversations.create(&assistant_id, None, None, None).unwrap();
        let msg = conversations
            .add_message(&conv.id, MessageRole::Assistant, "hi", None)
            .unwrap();

        assert!(conversations
            .set_feedback(&msg.id, "sideways", None, None)
            .is_err());
        let msg = conversations
            .set_feedback(&msg.id, "down", Some("wrong"), None)
            .unwrap();
        assert_eq!(msg.feedback.as_deref(), Some("down"));
        assert_eq!(msg.feedback_reason.as_deref(), Some("wrong"));
    }
}
