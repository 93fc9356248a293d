use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde_json::{Value, json};

use kindred_types::api::{
    Claims, ConnectNowRequest, ConnectNowResponse, LocationRequest, LocationResponse, NearbyQuery,
    PrivacyRequest, QuickHelloRequest, QuickHelloResponse,
};
use kindred_types::events::NearbyUser;

use crate::AppState;
use crate::error::ApiResult;

pub async fn update(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<LocationRequest>,
) -> ApiResult<Json<LocationResponse>> {
    let nearby = state
        .services
        .proximity
        .on_location_update(claims.sub, req.latitude, req.longitude)
        .await?;
    Ok(Json(LocationResponse { nearby }))
}

pub async fn connect_now(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ConnectNowRequest>,
) -> ApiResult<Json<ConnectNowResponse>> {
    let enabled = state
        .services
        .proximity
        .set_connect_now(claims.sub, req.enabled)
        .await?;
    Ok(Json(ConnectNowResponse {
        connect_now_enabled: enabled,
    }))
}

pub async fn privacy(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PrivacyRequest>,
) -> ApiResult<Json<Value>> {
    let show = state
        .services
        .proximity
        .set_show_exact_distance(claims.sub, req.show_exact_distance)
        .await?;
    Ok(Json(json!({ "show_exact_distance": show })))
}

pub async fn nearby(
    State(state): State<AppState>,
    Query(query): Query<NearbyQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<NearbyUser>>> {
    let users = state
        .services
        .proximity
        .nearby(claims.sub, query.radius)
        .await?;
    Ok(Json(users))
}

pub async fn quick_hello(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<QuickHelloRequest>,
) -> ApiResult<Json<QuickHelloResponse>> {
    let res = state
        .services
        .proximity
        .quick_hello(claims.sub, req.user_id, &req.message)
        .await?;
    Ok(Json(res))
}
