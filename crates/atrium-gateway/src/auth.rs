use axum::http::{HeaderMap, Method};

use atrium_core::{AtriumError, UserRole};

use crate::app::AppState;
use crate::error::ApiResult;

/// The verified caller of a request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub role: UserRole,
    /// `None` for the legacy admin sentinel.
    pub user_id: Option<String>,
    pub email: Option<String>,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Audit actor string: email when known, else "admin".
    pub fn actor(&self) -> String {
        self.email.clone().unwrap_or_else(|| "admin".to_string())
    }
}

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Resolve the caller from the session token header, or from a programmatic
/// API key in the Authorization header.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> ApiResult<Principal> {
    if let Some(token) = header(headers, "x-admin-token") {
        let claims = state.issuer.verify(token).ok_or_else(|| {
            AtriumError::Authentication("Invalid or expired token".to_string())
        })?;
        let role = claims.effective_role().ok_or_else(|| {
            AtriumError::Authorization("Invalid role in token".to_string())
        })?;

        // User-backed tokens must still map to an active account.
        if let Some(user_id) = claims.user_id() {
            let user = state
                .users
                .get(user_id)
                .map_err(|_| AtriumError::Authentication("Unknown user".to_string()))?;
            if !user.is_active {
                return Err(AtriumError::Authentication("Account disabled".to_string()).into());
            }
        }

        return Ok(Principal {
            role,
            user_id: claims.user_id().map(String::from),
            email: claims.email,
        });
    }

    if let Some(raw_key) = header(headers, "authorization").and_then(|v| v.strip_prefix("Bearer ")) {
        if let Some(api_key) = state.api_keys.verify(raw_key)? {
            let user = state
                .users
                .get(&api_key.user_id)
                .map_err(|_| AtriumError::Authentication("Unknown user".to_string()))?;
            if !user.is_active {
                return Err(AtriumError::Authentication("Account disabled".to_string()).into());
            }
            return Ok(Principal {
                role: user.role,
                user_id: Some(user.id),
                email: Some(user.email),
            });
        }
        return Err(AtriumError::Authentication("Invalid API key".to_string()).into());
    }

    Err(AtriumError::Authentication("Authentication token required".to_string()).into())
}

/// Authenticate and require at least `required` in the role ordering.
pub fn require_role(
    state: &AppState,
    headers: &HeaderMap,
    required: UserRole,
) -> ApiResult<Principal> {
    let principal = authenticate(state, headers)?;
    if !principal.role.allows(required) {
        return Err(AtriumError::Authorization(
            "Insufficient permissions for this operation".to_string(),
        )
        .into());
    }
    Ok(principal)
}

/// CSRF gate for mutating requests: the session token and a matching
/// `X-CSRF-Token` header must both be present. Safe methods skip the check;
/// API-key callers carry no CSRF surface and skip it too.
pub fn require_csrf(state: &AppState, headers: &HeaderMap, method: &Method) -> ApiResult<()> {
    if matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) {
        return Ok(());
    }

    let Some(token) = header(headers, "x-admin-token") else {
        // Authenticated via API key; nothing to cross-check.
        return Ok(());
    };

    let csrf = header(headers, "x-csrf-token").ok_or_else(|| {
        AtriumError::Authorization("CSRF token required for this operation".to_string())
    })?;

    if !state.issuer.verify_csrf(token, csrf) {
        return Err(AtriumError::Authorization("Invalid CSRF token".to_string()).into());
    }
    Ok(())
}
