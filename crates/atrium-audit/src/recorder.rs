use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::instrument;
use uuid::Uuid;

use atrium_core::RequestContext;

use crate::error::Result;
use crate::types::{AuditEntry, AuditQuery};

/// Thread-safe recorder for the append-only action log.
///
/// Every write stamps the actor and request context; rows are never updated
/// or deleted after insert.
pub struct AuditRecorder {
    db: Arc<Mutex<Connection>>,
}

const SELECT_COLS: &str = "id, action, resource_type, resource_id, actor, actor_id,
        ip_address, user_agent, details, old_values, new_values, created_at";

impl AuditRecorder {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Append one audit row.
    #[instrument(skip_all, fields(action = %action, resource_type = %resource_type))]
    pub fn log(
        &self,
        ctx: &RequestContext,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        details: Option<serde_json::Value>,
        old_values: Option<serde_json::Value>,
        new_values: Option<serde_json::Value>,
    ) -> Result<AuditEntry> {
        let entry = AuditEntry {
            id: Uuid::new_v4().to_string(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.map(String::from),
            actor: ctx.actor.clone(),
            actor_id: ctx.actor_id.clone(),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            details,
            old_values,
            new_values,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO audit_logs
             (id, action, resource_type, resource_id, actor, actor_id,
              ip_address, user_agent, details, old_values, new_values, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            rusqlite::params![
                entry.id,
                entry.action,
                entry.resource_type,
                entry.resource_id,
                entry.actor,
                entry.actor_id,
                entry.ip_address,
                entry.user_agent,
                entry.details.as_ref().map(|v| v.to_string()),
                entry.old_values.as_ref().map(|v| v.to_string()),
                entry.new_values.as_ref().map(|v| v.to_string()),
                entry.created_at,
            ],
        )?;

        Ok(entry)
    }

    pub fn log_user_action(
        &self,
        ctx: &RequestContext,
        action: &str,
        user_id: &str,
        old_values: Option<serde_json::Value>,
        new_values: Option<serde_json::Value>,
    ) -> Result<AuditEntry> {
        self.log(
            ctx,
            &format!("user.{action}"),
            "user",
            Some(user_id),
            None,
            old_values,
            new_values,
        )
    }

    pub fn log_api_key_action(
        &self,
        ctx: &RequestContext,
        action: &str,
        key_id: &str,
        details: Option<serde_json::Value>,
    ) -> Result<AuditEntry> {
        self.log(
            ctx,
            &format!("api_key.{action}"),
            "api_key",
            Some(key_id),
            details,
            None,
            None,
        )
    }

    pub fn log_quota_action(
        &self,
        ctx: &RequestContext,
        action: &str,
        quota_id: &str,
        old_values: Option<serde_json::Value>,
        new_values: Option<serde_json::Value>,
    ) -> Result<AuditEntry> {
        self.log(
            ctx,
            &format!("quota.{action}"),
            "quota",
            Some(quota_id),
            None,
            old_values,
            new_values,
        )
    }

    pub fn log_settings_action(
        &self,
        ctx: &RequestContext,
        action: &str,
        old_values: Option<serde_json::Value>,
        new_values: Option<serde_json::Value>,
    ) -> Result<AuditEntry> {
        self.log(
            ctx,
            &format!("settings.{action}"),
            "settings",
            None,
            None,
            old_values,
            new_values,
        )
    }

    /// Record a login attempt. Both successes and failures are kept.
    pub fn log_login(&self, ctx: &RequestContext, user_id: &str, success: bool) -> Result<AuditEntry> {
        let action = if success { "login.success" } else { "login.failed" };
        self.log(
            ctx,
            action,
            "auth",
            Some(user_id),
            Some(serde_json::json!({ "success": success })),
            None,
            None,
        )
    }

    /// Query audit rows with filters and paging. Returns (rows, total count).
    pub fn query(&self, q: &AuditQuery) -> Result<(Vec<AuditEntry>, u64)> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(action) = &q.action {
            if action.contains('.') {
                clauses.push("action = ?".to_string());
                args.push(Box::new(action.clone()));
            } else {
                clauses.push("action LIKE ?".to_string());
                args.push(Box::new(format!("{action}.%")));
            }
        }
        if let Some(rt) = &q.resource_type {
            clauses.push("resource_type = ?".to_string());
            args.push(Box::new(rt.clone()));
        }
        if let Some(rid) = &q.resource_id {
            clauses.push("resource_id = ?".to_string());
            args.push(Box::new(rid.clone()));
        }
        if let Some(actor) = &q.actor {
            clauses.push("actor = ?".to_string());
            args.push(Box::new(actor.clone()));
        }
        if let Some(start) = &q.start_date {
            clauses.push("created_at >= ?".to_string());
            args.push(Box::new(start.clone()));
        }
        if let Some(end) = &q.end_date {
            clauses.push("created_at <= ?".to_string());
            args.push(Box::new(end.clone()));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let db = self.db.lock().unwrap();

        let total: u64 = db.query_row(
            &format!("SELECT COUNT(*) FROM audit_logs{where_sql}"),
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| row.get(0),
        )?;

        let limit = if q.limit == 0 { 100 } else { q.limit };
        let mut stmt = db.prepare(&format!(
            "SELECT {SELECT_COLS} FROM audit_logs{where_sql}
             ORDER BY created_at DESC LIMIT {limit} OFFSET {offset}",
            offset = q.offset
        ))?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            row_to_entry,
        )?;

        Ok((rows.filter_map(|r| r.ok()).collect(), total))
    }

    /// Most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {SELECT_COLS} FROM audit_logs ORDER BY created_at DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_entry)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Full history for one resource, newest first.
    pub fn resource_history(
        &self,
        resource_type: &str,
        resource_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEntry>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {SELECT_COLS} FROM audit_logs
             WHERE resource_type = ?1 AND resource_id = ?2
             ORDER BY created_at DESC LIMIT ?3"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![resource_type, resource_id, limit as i64],
            row_to_entry,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let parse_json = |v: Option<String>| v.and_then(|s| serde_json::from_str(&s).ok());
    Ok(AuditEntry {
        id: row.get(0)?,
        action: row.get(1)?,
        resource_type: row.get(2)?,
        resource_id: row.get(3)?,
        actor: row.get(4)?,
        actor_id: row.get(5)?,
        ip_address: row.get(6)?,
        user_agent: row.get(7)?,
        details: parse_json(row.get(8)?),
        old_values: parse_json(row.get(9)?),
        new_values: parse_json(row.get(10)?),
        created_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> AuditRecorder {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        AuditRecorder::new(Arc::new(Mutex::new(conn)))
    }

    fn ctx() -> RequestContext {
        RequestContext::background().with_actor("admin@example.com", Some("u-1".to_string()))
    }

    #[test]
    fn every_row_has_actor_and_timestamp() {
        let recorder = recorder();
        let entry = recorder
            .log_user_action(&ctx(), "created", "u-42", None, Some(serde_json::json!({"email": "x@y.z"})))
            .unwrap();
        assert_eq!(entry.action, "user.created");
        assert!(!entry.actor.is_empty());
        assert!(!entry.created_at.is_empty());
    }

    #[test]
    fn prefix_filter_matches_action_family() {
        let recorder = recorder();
        recorder.log_user_action(&ctx(), "created", "u-1", None, None).unwrap();
        recorder.log_user_action(&ctx(), "disabled", "u-1", None, None).unwrap();
        recorder.log_api_key_action(&ctx(), "rotated", "k-1", None).unwrap();

        let (rows, total) = recorder
            .query(&AuditQuery {
                action: Some("user".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 2);
        assert!(rows.iter().all(|e| e.action.starts_with("user.")));

        let (rows, total) = recorder
            .query(&AuditQuery {
                action: Some("api_key.rotated".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].resource_id.as_deref(), Some("k-1"));
    }

    #[test]
    fn login_attempts_record_both_outcomes() {
        let recorder = recorder();
        recorder.log_login(&ctx(), "u-1", true).unwrap();
        recorder.log_login(&ctx(), "u-1", false).unwrap();

        let (rows, total) = recorder
            .query(&AuditQuery {
                action: Some("login".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 2);
        let actions: Vec<&str> = rows.iter().map(|e| e.action.as_str()).collect();
        assert!(actions.contains(&"login.success"));
        assert!(actions.contains(&"login.failed"));
    }

    #[test]
    fn paging_returns_total_alongside_window() {
        let recorder = recorder();
        for i in 0..5 {
            recorder
                .log_user_action(&ctx(), "updated", &format!("u-{i}"), None, None)
                .unwrap();
        }
        let (rows, total) = recorder
            .query(&AuditQuery {
                limit: 2,
                offset: 0,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(rows.len(), 2);
    }
}
