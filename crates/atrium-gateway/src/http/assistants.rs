use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method};
use axum::{Extension, Json};
use serde::Deserialize;
use tracing::warn;

use atrium_chat::types::AssistantParams;
use atrium_core::{RequestContext, UserRole};

use crate::app::AppState;
use crate::auth::{require_csrf, require_role};
use crate::error::ApiResult;

#[derive(Deserialize)]
pub struct ListQuery {
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
}

/// GET /api/v1/assistants
pub async fn list_assistants(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::User)?;
    let assistants = state
        .assistants
        .list(q.workspace_id.as_deref(), q.include_deleted)?;
    Ok(Json(serde_json::json!({ "assistants": assistants })))
}

/// POST /api/v1/assistants — manager and above.
pub async fn create_assistant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Json(mut params): Json<AssistantParams>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Manager)?;
    require_csrf(&state, &headers, &method)?;

    if params.workspace_id.is_none() {
        params.workspace_id = Some(state.default_workspace_id.clone());
    }
    let assistant = state.assistants.create(&params)?;
    Ok(Json(serde_json::to_value(assistant)?))
}

/// GET /api/v1/assistants/{id}
pub async fn get_assistant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::User)?;
    let assistant = state.assistants.get(&id, false)?;
    Ok(Json(serde_json::to_value(assistant)?))
}

/// PUT /api/v1/assistants/{id} — manager and above.
pub async fn update_assistant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Path(id): Path<String>,
    Json(params): Json<AssistantParams>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Manager)?;
    require_csrf(&state, &headers, &method)?;
    let assistant = state.assistants.update(&id, &params)?;
    Ok(Json(serde_json::to_value(assistant)?))
}

/// DELETE /api/v1/assistants/{id} — soft delete, recoverable.
pub async fn soft_delete_assistant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Manager)?;
    require_csrf(&state, &headers, &method)?;
    state.assistants.soft_delete(&id)?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

/// POST /api/v1/assistants/{id}/restore
pub async fn restore_assistant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Manager)?;
    require_csrf(&state, &headers, &method)?;
    state.assistants.restore(&id)?;
    Ok(Json(serde_json::json!({ "status": "restored" })))
}

/// DELETE /api/v1/assistants/{id}/purge — admin-only hard delete.
///
/// Removes the assistant's files and vector collection before the row
/// itself; conversation history survives with a detached assistant.
pub async fn purge_assistant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Extension(_ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Admin)?;
    require_csrf(&state, &headers, &method)?;

    // Existence check first (soft-deleted assistants can be purged).
    state.assistants.get(&id, true)?;

    for file in state.pipeline.files().list_for_assistant(&id)? {
        if let Err(e) = state.pipeline.delete_file(&file.id) {
            warn!(file_id = %file.id, error = %e, "file cleanup failed during purge");
        }
    }
    state.vectors.drop_collection(&id)?;
    state.assistants.hard_delete(&id)?;

    Ok(Json(serde_json::json!({ "status": "purged" })))
}
