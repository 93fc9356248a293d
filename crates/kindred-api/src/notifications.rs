use axum::{Extension, Json, extract::State, http::StatusCode};

use kindred_core::notify;
use kindred_types::api::{Claims, RegisterTokenRequest};

use crate::AppState;
use crate::error::ApiResult;

pub async fn register_token(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RegisterTokenRequest>,
) -> ApiResult<StatusCode> {
    notify::register_token(&state.services.db, claims.sub, &req.token).await?;
    Ok(StatusCode::NO_CONTENT)
}
