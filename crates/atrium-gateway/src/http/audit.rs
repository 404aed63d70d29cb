use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use atrium_audit::AuditQuery;
use atrium_core::UserRole;

use crate::app::AppState;
use crate::auth::require_role;
use crate::error::ApiResult;

#[derive(Deserialize)]
pub struct AuditParams {
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub actor: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

/// GET /api/v1/audit — admin only. `action` filters exactly when dotted,
/// else as a prefix.
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<AuditParams>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Admin)?;

    let (entries, total) = state.audit.query(&AuditQuery {
        action: params.action,
        resource_type: params.resource_type,
        resource_id: params.resource_id,
        actor: params.actor,
        start_date: params.start_date,
        end_date: params.end_date,
        limit: params.limit,
        offset: params.offset,
    })?;
    Ok(Json(serde_json::json!({ "entries": entries, "total": total })))
}

/// GET /api/v1/audit/recent — admin only.
pub async fn recent_audit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Admin)?;
    let entries = state.audit.recent(50)?;
    Ok(Json(serde_json::json!({ "entries": entries })))
}

/// GET /api/v1/audit/resource/{resource_type}/{resource_id} — admin only.
pub async fn resource_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((resource_type, resource_id)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Admin)?;
    let entries = state.audit.resource_history(&resource_type, &resource_id, 50)?;
    Ok(Json(serde_json::json!({ "entries": entries })))
}
