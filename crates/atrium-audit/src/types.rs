use serde::{Deserialize, Serialize};

/// One append-only audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    /// Dotted action name, e.g. "user.created", "login.failed".
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    /// Actor identifier: an email, "admin", or "system".
    pub actor: String,
    pub actor_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Free-form context blob.
    pub details: Option<serde_json::Value>,
    /// Snapshot before a mutation.
    pub old_values: Option<serde_json::Value>,
    /// Snapshot after a mutation.
    pub new_values: Option<serde_json::Value>,
    /// RFC3339 insertion timestamp. Never changes after insert.
    pub created_at: String,
}

/// Filter set for `AuditRecorder::query`.
///
/// `action` matches exactly when it contains a dot, otherwise as a dotted
/// prefix ("user" matches "user.created", "user.disabled", ...).
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub actor: Option<String>,
    /// RFC3339 inclusive lower bound.
    pub start_date: Option<String>,
    /// RFC3339 inclusive upper bound.
    pub end_date: Option<String>,
    pub limit: usize,
    pub offset: usize,
}
