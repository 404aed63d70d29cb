use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method};
use axum::{Extension, Json};
use serde::Deserialize;

use atrium_core::{AtriumError, RequestContext, UserRole};
use atrium_vault::Provider;

use crate::app::AppState;
use crate::auth::{require_csrf, require_role};
use crate::error::ApiResult;
use crate::rate_limit::RateCategory;

#[derive(Deserialize)]
pub struct ListQuery {
    pub provider: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateKeyRequest {
    pub provider: String,
    pub name: String,
    pub api_key: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Deserialize)]
pub struct UpdateKeyRequest {
    pub name: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct RotateKeyRequest {
    pub api_key: String,
}

fn parse_provider(s: &str) -> ApiResult<Provider> {
    s.parse::<Provider>()
        .map_err(|e| AtriumError::Validation(e).into())
}

/// GET /api/v1/provider-keys — admin only. Key material never leaves the
/// vault; rows serialize without the ciphertext.
pub async fn list_keys(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Admin)?;
    let provider = q.provider.as_deref().map(parse_provider).transpose()?;
    let keys = state.vault.list(provider)?;
    Ok(Json(serde_json::json!({ "keys": keys })))
}

/// POST /api/v1/provider-keys
pub async fn create_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateKeyRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = require_role(&state, &headers, UserRole::Admin)?;
    require_csrf(&state, &headers, &method)?;
    state.check_rate(RateCategory::Keys, &ctx)?;

    let provider = parse_provider(&req.provider)?;
    let key = state
        .vault
        .create(provider, &req.name, &req.api_key, req.is_default)?;

    let ctx = ctx.with_actor(principal.actor(), principal.user_id.clone());
    let _ = state.audit.log_api_key_action(
        &ctx,
        "created",
        &key.id,
        Some(serde_json::json!({ "provider": provider.to_string(), "name": key.name })),
    );
    Ok(Json(serde_json::to_value(key)?))
}

/// PATCH /api/v1/provider-keys/{id}
pub async fn update_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(req): Json<UpdateKeyRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = require_role(&state, &headers, UserRole::Admin)?;
    require_csrf(&state, &headers, &method)?;
    state.check_rate(RateCategory::Keys, &ctx)?;

    let key = state.vault.update(&id, req.name.as_deref(), req.is_active)?;

    let ctx = ctx.with_actor(principal.actor(), principal.user_id.clone());
    let _ = state.audit.log_api_key_action(&ctx, "updated", &id, None);
    Ok(Json(serde_json::to_value(key)?))
}

/// DELETE /api/v1/provider-keys/{id}
pub async fn delete_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = require_role(&state, &headers, UserRole::Admin)?;
    require_csrf(&state, &headers, &method)?;
    state.check_rate(RateCategory::Keys, &ctx)?;

    state.vault.delete(&id)?;

    let ctx = ctx.with_actor(principal.actor(), principal.user_id.clone());
    let _ = state.audit.log_api_key_action(&ctx, "deleted", &id, None);
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

/// POST /api/v1/provider-keys/{id}/default
pub async fn set_default_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = require_role(&state, &headers, UserRole::Admin)?;
    require_csrf(&state, &headers, &method)?;
    state.check_rate(RateCategory::Keys, &ctx)?;

    let key = state.vault.set_default(&id)?;

    let ctx = ctx.with_actor(principal.actor(), principal.user_id.clone());
    let _ = state.audit.log_api_key_action(&ctx, "default_set", &id, None);
    Ok(Json(serde_json::to_value(key)?))
}

/// POST /api/v1/provider-keys/{id}/rotate — new row linked to its
/// predecessor; the old key is deactivated in the same transaction.
pub async fn rotate_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(req): Json<RotateKeyRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = require_role(&state, &headers, UserRole::Admin)?;
    require_csrf(&state, &headers, &method)?;
    state.check_rate(RateCategory::Keys, &ctx)?;

    let key = state.vault.rotate(&id, &req.api_key)?;

    let ctx = ctx.with_actor(principal.actor(), principal.user_id.clone());
    let _ = state.audit.log_api_key_action(
        &ctx,
        "rotated",
        &key.id,
        Some(serde_json::json!({ "rotated_from": id })),
    );
    Ok(Json(serde_json::to_value(key)?))
}

/// POST /api/v1/provider-keys/{id}/test — liveness probe, 10 s budget.
pub async fn test_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = require_role(&state, &headers, UserRole::Admin)?;
    state.check_rate(RateCategory::Keys, &ctx)?;

    let report = state.vault.test(&id).await?;

    let ctx = ctx.with_actor(principal.actor(), principal.user_id.clone());
    let _ = state.audit.log_api_key_action(
        &ctx,
        "tested",
        &id,
        Some(serde_json::json!({ "valid": report.valid })),
    );
    Ok(Json(serde_json::to_value(report)?))
}
