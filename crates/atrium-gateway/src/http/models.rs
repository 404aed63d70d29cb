use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use tracing::warn;

use atrium_core::UserRole;

use crate::app::AppState;
use crate::auth::require_role;
use crate::error::ApiResult;

/// GET /api/v1/models — the provider's catalogue, featured models first.
/// A provider outage degrades to an empty list rather than an error.
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::User)?;

    let models = match state.provider.client().list_models().await {
        Ok(models) => models,
        Err(e) => {
            warn!(error = %e, "model listing failed; returning empty list");
            Vec::new()
        }
    };
    Ok(Json(serde_json::json!({ "models": models })))
}

/// GET /api/v1/provider/status — provider reachability with latency.
pub async fn provider_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&state, &headers, UserRole::Manager)?;

    let (connected, latency_ms, error) = state.provider.client().check_connectivity().await;
    Ok(Json(serde_json::json!({
        "connected": connected,
        "latency_ms": latency_ms,
        "error": error,
    })))
}
