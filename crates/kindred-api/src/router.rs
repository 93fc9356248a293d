use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::require_auth;
use crate::{AppState, chat, discovery, location, matches, notifications};

/// REST routes behind the JWT middleware, plus the `/gateway` upgrade which
/// authenticates with its own Identify frame.
pub fn build_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/matches", get(matches::list))
        .route("/matches/interaction", post(matches::interaction))
        .route("/matches/{match_id}/respond", post(matches::respond))
        .route("/discover/feed", get(discovery::feed))
        .route("/discover/top-picks", get(discovery::top_picks))
        .route("/chat/{user_id}/messages", get(chat::history))
        .route("/chat/conversations/{conversation_id}/read", post(chat::mark_read))
        .route("/location", post(location::update))
        .route("/location/connect-now", put(location::connect_now))
        .route("/location/privacy", put(location::privacy))
        .route("/location/nearby", get(location::nearby))
        .route("/location/quick-hello", post(location::quick_hello))
        .route("/notifications/tokens", post(notifications::register_token))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let services = state.services.clone();
    let jwt_secret = state.jwt_secret.clone();
    ws.on_upgrade(move |socket| kindred_gateway::handle_connection(socket, services, jwt_secret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    use kindred_core::notify::RecordingDispatcher;
    use kindred_core::{Services, Settings};
    use kindred_db::{Database, ProfileRow};
    use kindred_types::api::Claims;

    use crate::AppStateInner;

    const SECRET: &str = "router-test-secret";

    fn app(n: usize) -> (Router, AppState, Vec<Uuid>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let users = (0..n)
            .map(|i| {
                let mut row = ProfileRow::new(Uuid::new_v4());
                row.display_name = Some(format!("user{i}"));
                row.onboarding_completed = true;
                db.upsert_profile(&row).unwrap();
                row.id
            })
            .collect();
        let services = Services::new(db, Arc::new(RecordingDispatcher::new()), Settings::default());
        let state = Arc::new(AppStateInner {
            services,
            jwt_secret: Arc::from(SECRET),
        });
        (build_router(state.clone()), state, users)
    }

    fn token(user: Uuid) -> String {
        let exp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as usize + 3600;
        encode(
            &Header::default(),
            &Claims { sub: user, exp },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn request(method: &str, uri: &str, user: Uuid, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token(user)));
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(res: axum::response::Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let (app, _state, _users) = app(1);
        let res = app
            .oneshot(Request::builder().uri("/matches").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_mutual_like_over_rest() {
        let (app, _state, users) = app(2);
        let (a, b) = (users[0], users[1]);

        let first = app
            .clone()
            .oneshot(request(
                "POST",
                "/matches/interaction",
                a,
                Some(json!({ "target_id": b, "action": "LIKE" })),
            ))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let first = json_body(first).await;
        assert_eq!(first["match"]["status"], "pending");

        let match_id = first["match"]["id"].as_str().unwrap().to_string();
        let res = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/matches/{match_id}/respond"),
                b,
                Some(json!({ "accept": true })),
            ))
            .await
            .unwrap();
        assert_eq!(json_body(res).await["status"], "active");

        let res = app.oneshot(request("GET", "/matches", a, None)).await.unwrap();
        let listed = json_body(res).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["status"], "active");
    }

    #[tokio::test]
    async fn test_errors_carry_code() {
        let (app, state, users) = app(2);
        let (a, b) = (users[0], users[1]);
        state
            .services
            .matches
            .swipe(a, b, kindred_types::models::SwipeAction::Like)
            .await
            .unwrap();

        let res = app
            .clone()
            .oneshot(request("GET", &format!("/chat/{a}/messages"), a, None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["code"], "validation");

        let res = app
            .oneshot(request(
                "POST",
                "/location/quick-hello",
                a,
                Some(json!({ "user_id": Uuid::new_v4(), "message": "hi" })),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(res).await["code"], "not_found");
    }

    #[tokio::test]
    async fn test_push_token_validation() {
        let (app, _state, users) = app(1);
        let res = app
            .clone()
            .oneshot(request(
                "POST",
                "/notifications/tokens",
                users[0],
                Some(json!({ "token": "nope" })),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app
            .oneshot(request(
                "POST",
                "/notifications/tokens",
                users[0],
                Some(json!({ "token": "ExponentPushToken[abc123]" })),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }
}
