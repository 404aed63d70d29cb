use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method};
use axum::{Extension, Json};
use serde::Deserialize;

use atrium_core::{RequestContext, UserRole};
use atrium_quota::types::QuotaUpdate;

use crate::app::AppState;
use crate::auth::{authenticate, require_csrf, require_role};
use crate::error::ApiResult;
use crate::rate_limit::RateCategory;

#[derive(Deserialize)]
pub struct StatusQuery {
    pub user_id: Option<String>,
}

/// GET /api/v1/quotas/global — admin only.
pub async fn get_global(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Admin)?;
    let quota = state.quota.get_or_create_global_quota()?;
    Ok(Json(serde_json::to_value(quota)?))
}

/// PATCH /api/v1/quotas/global — admin only, audited with before/after.
pub async fn update_global(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Extension(ctx): Extension<RequestContext>,
    Json(update): Json<QuotaUpdate>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = require_role(&state, &headers, UserRole::Admin)?;
    require_csrf(&state, &headers, &method)?;
    state.check_rate(RateCategory::Settings, &ctx)?;

    let before = state.quota.get_or_create_global_quota()?;
    let quota = state.quota.update_global_quota(&update)?;

    let ctx = ctx.with_actor(principal.actor(), principal.user_id.clone());
    let _ = state.audit.log_quota_action(
        &ctx,
        "updated",
        &quota.id,
        Some(serde_json::to_value(&before)?),
        Some(serde_json::to_value(&quota)?),
    );
    Ok(Json(serde_json::to_value(quota)?))
}

/// GET /api/v1/quotas/users/{id} — admin only.
pub async fn get_user_quota(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Admin)?;
    let quota = state.quota.get_user_quota(&id)?;
    Ok(Json(serde_json::json!({ "quota": quota })))
}

/// PUT /api/v1/quotas/users/{id} — admin only.
pub async fn set_user_quota(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    method: Method,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(update): Json<QuotaUpdate>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = require_role(&state, &headers, UserRole::Admin)?;
    require_csrf(&state, &headers, &method)?;
    state.check_rate(RateCategory::Settings, &ctx)?;

    // The target must exist.
    state.users.get(&id)?;
    let before = state.quota.get_user_quota(&id)?;
    let quota = state.quota.set_user_quota(&id, &update)?;

    let ctx = ctx.with_actor(principal.actor(), principal.user_id.clone());
    let _ = state.audit.log_quota_action(
        &ctx,
        "updated",
        &quota.id,
        before.map(|q| serde_json::to_value(q).unwrap_or_default()),
        Some(serde_json::to_value(&quota)?),
    );
    Ok(Json(serde_json::to_value(quota)?))
}

/// GET /api/v1/quotas/status — usage with limits and percentages. Admins may
/// inspect another user's scope; everyone else sees their own.
pub async fn usage_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<StatusQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    let scope = if principal.is_admin() {
        q.user_id.or(principal.user_id.clone())
    } else {
        principal.user_id.clone()
    };

    let check = state.quota.check(scope.as_deref())?;
    Ok(Json(serde_json::to_value(check)?))
}

/// GET /api/v1/quotas/alerts
pub async fn usage_alerts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<StatusQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let principal = authenticate(&state, &headers)?;
    let scope = if principal.is_admin() {
        q.user_id.or(principal.user_id.clone())
    } else {
        principal.user_id.clone()
    };

    let alerts = state.quota.alerts(scope.as_deref())?;
    Ok(Json(serde_json::json!({ "alerts": alerts })))
}
