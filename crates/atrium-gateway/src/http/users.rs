use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method};
use axum::{Extension, Json};
use serde::Deserialize;

use atrium_auth::users::UserFilter;
use atrium_core::{AtriumError, RequestContext, UserRole};

use crate::app::AppState;
use crate::auth::{authenticate, require_csrf, require_role};
use crate::error::ApiResult;

#[derive(Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub page: usize,
    #[serde(default)]
    pub size: usize,
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct PasswordChangeRequest {
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub expires_in_days: Option<i64>,
}

fn parse_role(role: Option<&str>) -> ApiResult<Option<UserRole>> {
    role.map(|r| {
        r.parse::<UserRole>()
            .map_err(|e| AtriumError::Validation(e).into())
    })
    .transpose()
}

/// GET /api/v1/users — manager and above.
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Manager)?;
    let filter = UserFilter {
        search: q.search,
        role: parse_role(q.role.as_deref())?,
        is_active: q.is_active,
        page: q.page.max(1),
        size: q.size,
    };
    let (users, total) = state.users.list(&filter)?;
    Ok(Json(serde_json::json!({ "users": users, "total": total })))
}

/// POST /api/v1/users — admin only.
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = require_role(&state, &headers, UserRole::Admin)?;
    require_csrf(&state, &headers, &method)?;

    let role = parse_role(req.role.as_deref())?.unwrap_or(UserRole::User);
    let user = state
        .users
        .create(&req.email, &req.password, &req.name, role, false)?;

    let ctx = ctx.with_actor(principal.actor(), principal.user_id.clone());
    let _ = state.audit.log_user_action(
        &ctx,
        "created",
        &user.id,
        None,
        Some(serde_json::json!({ "email": user.email, "role": user.role.to_string() })),
    );
    Ok(Json(serde_json::to_value(user)?))
}

/// GET /api/v1/users/{id} — self, or manager and above.
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    if principal.user_id.as_deref() != Some(id.as_str())
        && !principal.role.allows(UserRole::Manager)
    {
        return Err(
            AtriumError::Authorization("Insufficient permissions".to_string()).into(),
        );
    }
    let user = state.users.get(&id)?;
    Ok(Json(serde_json::to_value(user)?))
}

/// PATCH /api/v1/users/{id} — admin only.
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = require_role(&state, &headers, UserRole::Admin)?;
    require_csrf(&state, &headers, &method)?;

    let before = state.users.get(&id)?;
    let user = state.users.update(
        &id,
        req.email.as_deref(),
        req.name.as_deref(),
        parse_role(req.role.as_deref())?,
    )?;

    let ctx = ctx.with_actor(principal.actor(), principal.user_id.clone());
    let _ = state.audit.log_user_action(
        &ctx,
        "updated",
        &id,
        Some(serde_json::json!({ "email": before.email, "name": before.name, "role": before.role.to_string() })),
        Some(serde_json::json!({ "email": user.email, "name": user.name, "role": user.role.to_string() })),
    );
    Ok(Json(serde_json::to_value(user)?))
}

/// POST /api/v1/users/{id}/password — admin, or the user themself.
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(req): Json<PasswordChangeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    if principal.user_id.as_deref() != Some(id.as_str()) && !principal.is_admin() {
        return Err(
            AtriumError::Authorization("Insufficient permissions".to_string()).into(),
        );
    }
    require_csrf(&state, &headers, &method)?;

    state.users.change_password(&id, &req.new_password)?;

    let ctx = ctx.with_actor(principal.actor(), principal.user_id.clone());
    let _ = state
        .audit
        .log_user_action(&ctx, "password_changed", &id, None, None);
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// POST /api/v1/users/{id}/activate — admin only.
pub async fn activate_user(
    state: State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    ctx: Extension<RequestContext>,
    id: Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    set_active(state, headers, method, ctx, id, true).await
}

/// POST /api/v1/users/{id}/deactivate — admin only.
pub async fn deactivate_user(
    state: State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    ctx: Extension<RequestContext>,
    id: Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    set_active(state, headers, method, ctx, id, false).await
}

async fn set_active(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    is_active: bool,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = require_role(&state, &headers, UserRole::Admin)?;
    require_csrf(&state, &headers, &method)?;

    let user = state.users.set_active(&id, is_active)?;

    let action = if is_active { "activated" } else { "deactivated" };
    let ctx = ctx.with_actor(principal.actor(), principal.user_id.clone());
    let _ = state.audit.log_user_action(&ctx, action, &id, None, None);
    Ok(Json(serde_json::to_value(user)?))
}

/// DELETE /api/v1/users/{id} — admin only.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = require_role(&state, &headers, UserRole::Admin)?;
    require_csrf(&state, &headers, &method)?;

    let before = state.users.get(&id)?;
    state.users.delete(&id)?;

    let ctx = ctx.with_actor(principal.actor(), principal.user_id.clone());
    let _ = state.audit.log_user_action(
        &ctx,
        "deleted",
        &id,
        Some(serde_json::json!({ "email": before.email })),
        None,
    );
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

/// GET /api/v1/users/me/api-keys — the caller's own keys.
pub async fn list_my_api_keys(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    let user_id = principal
        .user_id
        .ok_or_else(|| AtriumError::Validation("admin token has no API keys".to_string()))?;
    let keys = state.api_keys.list_for_user(&user_id)?;
    Ok(Json(serde_json::json!({ "api_keys": keys })))
}

/// POST /api/v1/users/me/api-keys — the raw key appears in this response
/// only.
pub async fn create_my_api_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<CreateApiKeyRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    require_csrf(&state, &headers, &method)?;
    let user_id = principal
        .user_id
        .clone()
        .ok_or_else(|| AtriumError::Validation("admin token has no API keys".to_string()))?;

    let (key, raw_key) = state.api_keys.create(&user_id, &req.name, req.expires_in_days)?;

    let ctx = ctx.with_actor(principal.actor(), principal.user_id.clone());
    let _ = state.audit.log_api_key_action(
        &ctx,
        "created",
        &key.id,
        Some(serde_json::json!({ "name": key.name })),
    );
    Ok(Json(serde_json::json!({ "api_key": key, "key": raw_key })))
}

/// DELETE /api/v1/users/me/api-keys/{id}
pub async fn revoke_my_api_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    require_csrf(&state, &headers, &method)?;
    let user_id = principal
        .user_id
        .clone()
        .ok_or_else(|| AtriumError::Validation("admin token has no API keys".to_string()))?;

    if !state.api_keys.revoke(&id, &user_id)? {
        return Err(AtriumError::NotFound {
            resource: "api key",
            id,
        }
        .into());
    }

    let ctx = ctx.with_actor(principal.actor(), principal.user_id.clone());
    let _ = state.audit.log_api_key_action(&ctx, "revoked", &id, None);
    Ok(Json(serde_json::json!({ "status": "revoked" })))
}
