use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use atrium_core::RequestContext;

use crate::app::AppState;

/// Build the per-request correlation context, run the handler, then stamp
/// response headers: the echoed request id plus the security header set.
pub async fn request_context(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let mut ctx = RequestContext::new(request_id.clone());
    ctx.ip_address = Some(addr.ip().to_string());
    ctx.user_agent = user_agent;

    // Best-effort actor attribution for audit rows; handlers refine it after
    // full verification.
    if let Some(claims) = request
        .headers()
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .and_then(|t| state.issuer.verify(t))
    {
        let actor = claims.email.clone().unwrap_or_else(|| claims.sub.clone());
        ctx = ctx.with_actor(actor, claims.user_id().map(String::from));
    }

    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert("x-request-id", value);
    }
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "permissions-policy",
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static(
            "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; \
             img-src 'self' data:; font-src 'self'; connect-src 'self' https://openrouter.ai",
        ),
    );
    if state.config.is_production() {
        headers.insert(
            "strict-transport-security",
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }

    response
}
