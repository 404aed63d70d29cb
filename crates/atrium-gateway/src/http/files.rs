use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, Method};
use axum::{Extension, Json};
use tracing::error;

use atrium_core::{AtriumError, RequestContext, UserRole};

use crate::app::AppState;
use crate::auth::{require_csrf, require_role};
use crate::error::ApiResult;
use crate::rate_limit::RateCategory;

/// POST /api/v1/assistants/{id}/files — multipart upload.
///
/// Validation failures answer synchronously; processing itself runs in a
/// background task and is observable through the file's status field.
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Extension(ctx): Extension<RequestContext>,
    Path(assistant_id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Manager)?;
    require_csrf(&state, &headers, &method)?;
    state.check_rate(RateCategory::Upload, &ctx)?;

    let assistant = state.assistants.get(&assistant_id, false)?;

    let mut payload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AtriumError::Validation(e.to_string()))?
    {
        if field.name() == Some("file") {
            let filename = field
                .file_name()
                .map(String::from)
                .ok_or_else(|| AtriumError::Validation("Filename is required".to_string()))?;
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AtriumError::Validation(e.to_string()))?;
            payload = Some((filename, bytes.to_vec()));
        }
    }
    let (filename, bytes) = payload
        .ok_or_else(|| AtriumError::Validation("multipart field 'file' is required".to_string()))?;

    let file = state.pipeline.upload(
        &assistant.id,
        assistant.workspace_id.as_deref(),
        &filename,
        &bytes,
    )?;

    // Dispatch the first processing attempt; retries belong to the reaper.
    let pipeline = state.pipeline.clone();
    let file_id = file.id.clone();
    tokio::spawn(async move {
        if let Err(e) = pipeline.process_file(&file_id).await {
            error!(file_id = %file_id, error = %e, "initial processing dispatch failed");
        }
    });

    Ok(Json(serde_json::to_value(file)?))
}

/// GET /api/v1/assistants/{id}/files
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(assistant_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::User)?;
    state.assistants.get(&assistant_id, false)?;
    let files = state.pipeline.files().list_for_assistant(&assistant_id)?;
    Ok(Json(serde_json::json!({ "files": files })))
}

/// GET /api/v1/files/{id}
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::User)?;
    let file = state.pipeline.files().get(&id)?;
    Ok(Json(serde_json::to_value(file)?))
}

/// DELETE /api/v1/files/{id}
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Manager)?;
    require_csrf(&state, &headers, &method)?;
    state.pipeline.delete_file(&id)?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

/// POST /api/v1/files/{id}/reprocess — clear chunks and requeue.
pub async fn reprocess_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Manager)?;
    require_csrf(&state, &headers, &method)?;
    let file = state.pipeline.reprocess(&id)?;
    Ok(Json(serde_json::to_value(file)?))
}
