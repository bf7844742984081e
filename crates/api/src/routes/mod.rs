pub mod health;
pub mod realtime;
pub mod sessions;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::middleware::{auth_middleware, AuthState};
use crate::openapi::openapi_json;
use crate::state::AppState;

/// Build the full application router.
pub fn app(state: AppState, auth: AuthState) -> Router {
    let protected = Router::new()
        .route("/session/start", post(sessions::start_session))
        .route("/session/{session_id}", get(sessions::get_session))
        .route("/session/{session_id}/end", post(sessions::end_session))
        .route(
            "/session/{session_id}/chunks",
            get(sessions::list_session_chunks),
        )
        .route("/ws/session/{session_id}", get(realtime::session_ws))
        .layer(from_fn_with_state(auth, auth_middleware));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/openapi.json", get(openapi_json))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
