use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use uuid::Uuid;

use kindred_types::api::{Claims, HistoryQuery, MarkReadResponse};
use kindred_types::models::MessageView;

use crate::AppState;
use crate::error::ApiResult;

/// Cursor pagination: pass the `created_at` and `id` of the oldest message
/// from the previous page as `before` and `before_id`.
pub async fn history(
    State(state): State<AppState>,
    Path(other_user_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<MessageView>>> {
    let page = state
        .services
        .delivery
        .history(claims.sub, other_user_id, query.cursor(), query.limit)
        .await?;
    Ok(Json(page))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<MarkReadResponse>> {
    let updated = state
        .services
        .delivery
        .mark_read(claims.sub, &conversation_id)
        .await?;
    Ok(Json(MarkReadResponse { updated }))
}
