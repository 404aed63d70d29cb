use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method};
use axum::{Extension, Json};
use serde::Deserialize;

use atrium_core::{RequestContext, UserRole};

use crate::app::AppState;
use crate::auth::{require_csrf, require_role};
use crate::error::ApiResult;

#[derive(Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    pub slug: String,
}

/// GET /api/v1/workspaces — manager and above.
pub async fn list_workspaces(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Manager)?;
    let workspaces = state.workspaces.list()?;
    Ok(Json(serde_json::json!({ "workspaces": workspaces })))
}

/// POST /api/v1/workspaces — admin only.
pub async fn create_workspace(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Json(req): Json<CreateWorkspaceRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Admin)?;
    require_csrf(&state, &headers, &method)?;
    let workspace = state.workspaces.create(&req.name, &req.slug)?;
    Ok(Json(serde_json::to_value(workspace)?))
}

/// DELETE /api/v1/workspaces/{id} — admin only. Dependent records are
/// detached (workspace id set null), not removed.
pub async fn delete_workspace(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = require_role(&state, &headers, UserRole::Admin)?;
    require_csrf(&state, &headers, &method)?;

    let before = state.workspaces.get(&id)?;
    state.workspaces.delete(&id)?;

    let ctx = ctx.with_actor(principal.actor(), principal.user_id.clone());
    let _ = state.audit.log(
        &ctx,
        "settings.workspace_deleted",
        "workspace",
        Some(&id),
        None,
        Some(serde_json::json!({ "name": before.name, "slug": before.slug })),
        None,
    );
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}
