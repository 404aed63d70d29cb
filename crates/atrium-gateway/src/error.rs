use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use atrium_core::AtriumError;

/// Wire wrapper mapping [`AtriumError`] onto HTTP responses.
pub struct ApiError(pub AtriumError);

impl<E: Into<AtriumError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut body = serde_json::json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        });
        if let AtriumError::RateLimited { retry_after_secs } = &self.0 {
            body["retry_after"] = serde_json::json!(retry_after_secs);
        }

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
