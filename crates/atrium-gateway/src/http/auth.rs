use std::sync::Arc;

use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;
use tracing::{info, warn};

use atrium_auth::password::verify_password;
use atrium_core::{AtriumError, RequestContext};

use crate::app::AppState;
use crate::error::ApiResult;
use crate::rate_limit::RateCategory;

#[derive(Deserialize)]
pub struct AdminLoginRequest {
    pub password: String,
}

#[derive(Deserialize)]
pub struct UserLoginRequest {
    pub email: String,
    pub password: String,
}

/// POST /api/v1/auth/login — admin dashboard login.
///
/// Verifies against the configured admin password (argon2 hash in
/// production, plaintext in development) and issues a legacy admin token.
pub async fn admin_login(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<AdminLoginRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.check_rate(RateCategory::Login, &ctx)?;

    let configured = state
        .config
        .security
        .admin_password
        .as_deref()
        .ok_or_else(|| AtriumError::Authentication("Admin login is disabled".to_string()))?;

    if !verify_password(&req.password, configured) {
        warn!("admin login failed");
        let ctx = ctx.clone().with_actor("admin", None);
        let _ = state.audit.log_login(&ctx, "admin", false);
        return Err(AtriumError::Authentication("Invalid credentials".to_string()).into());
    }

    let (token, expires_at, csrf_token) = state
        .issuer
        .issue_admin()
        .ok_or_else(|| AtriumError::Internal("token issuance failed".to_string()))?;

    let ctx = ctx.with_actor("admin", None);
    let _ = state.audit.log_login(&ctx, "admin", true);
    info!("admin login succeeded");

    Ok(Json(serde_json::json!({
        "token": token,
        "expires_at": expires_at.to_rfc3339(),
        "csrf_token": csrf_token,
    })))
}

/// POST /api/v1/auth/user/login — email + password login.
pub async fn user_login(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<UserLoginRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.check_rate(RateCategory::Login, &ctx)?;

    let user = match state.users.authenticate(&req.email, &req.password)? {
        Some(user) => user,
        None => {
            let ctx = ctx.clone().with_actor(req.email.to_lowercase(), None);
            let _ = state.audit.log_login(&ctx, "unknown", false);
            return Err(AtriumError::Authentication("Invalid credentials".to_string()).into());
        }
    };

    let (token, expires_at, csrf_token) = state
        .issuer
        .issue_user(&user)
        .ok_or_else(|| AtriumError::Internal("token issuance failed".to_string()))?;

    let ctx = ctx.with_actor(user.email.clone(), Some(user.id.clone()));
    let _ = state.audit.log_login(&ctx, &user.id, true);

    Ok(Json(serde_json::json!({
        "token": token,
        "expires_at": expires_at.to_rfc3339(),
        "csrf_token": csrf_token,
        "user": user,
    })))
}
