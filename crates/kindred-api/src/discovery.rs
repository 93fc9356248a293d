use axum::{Extension, Json, extract::State};
use uuid::Uuid;

use kindred_core::discovery::Policy;
use kindred_types::api::{Candidate, Claims};

use crate::AppState;
use crate::error::ApiResult;

async fn rank(state: AppState, viewer: Uuid, policy: Policy) -> ApiResult<Json<Vec<Candidate>>> {
    Ok(Json(state.services.discovery.rank(viewer, policy).await?))
}

pub async fn feed(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Candidate>>> {
    rank(state, claims.sub, Policy::Feed).await
}

pub async fn top_picks(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Candidate>>> {
    rank(state, claims.sub, Policy::TopPicks).await
}
