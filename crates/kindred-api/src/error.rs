use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use kindred_core::KindredError;
use kindred_types::events::ErrorCode;

/// REST face of [`KindredError`]: `{"error": ..., "code": ...}` with a
/// matching status.
#[derive(Debug)]
pub struct ApiError(pub KindredError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<KindredError> for ApiError {
    fn from(err: KindredError) -> Self {
        Self(err)
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::StateConflict => StatusCode::CONFLICT,
        ErrorCode::Upstream => StatusCode::BAD_GATEWAY,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        if let KindredError::Internal(e) = &self.0 {
            error!("Request failed: {:#}", e);
        }
        let body = Json(json!({
            "error": self.0.public_reason(),
            "code": code,
        }));
        (status_for(code), body).into_response()
    }
}
