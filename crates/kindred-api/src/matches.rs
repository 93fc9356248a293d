use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use kindred_types::api::{
    Claims, InteractionRequest, InteractionResponse, MatchListing, RespondRequest, RespondResponse,
};

use crate::AppState;
use crate::error::ApiResult;

pub async fn interaction(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<InteractionRequest>,
) -> ApiResult<Json<InteractionResponse>> {
    let res = state
        .services
        .matches
        .swipe(claims.sub, req.target_id, req.action)
        .await?;
    Ok(Json(res))
}

pub async fn respond(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RespondRequest>,
) -> ApiResult<Json<RespondResponse>> {
    let res = state
        .services
        .matches
        .respond(match_id, claims.sub, req.accept)
        .await?;
    Ok(Json(res))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<MatchListing>>> {
    Ok(Json(state.services.matches.list_for_user(claims.sub).await?))
}
