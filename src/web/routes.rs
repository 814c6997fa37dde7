use axum::{
    extract::DefaultBodyLimit,
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use super::handlers;
use super::ws::ws_handler;
use crate::audio::FILES_ROUTE;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let max_body = state.config.web.max_body_bytes;

    let robot_routes = Router::new()
        .route("/connect", get(handlers::connect))
        .route("/disconnect", get(handlers::disconnect))
        .route("/walk", get(handlers::walk))
        .route("/stateG1", get(handlers::state_g1))
        .route("/balanceG1", get(handlers::balance_g1))
        .route("/heartbeat", get(handlers::heartbeat))
        .route("/led", post(handlers::led))
        .route("/arm", post(handlers::arm));

    // The pipeline enforces its own per-file cap while streaming
    let upload_routes = Router::new()
        .route("/audio", post(handlers::upload_audio))
        .layer(DefaultBodyLimit::max(max_body));

    let files = ServeDir::new(state.audio.dir());

    Router::new()
        .route("/", get(handlers::index))
        .route("/video", get(handlers::video))
        .route("/health", get(handlers::health))
        .route("/ws", any(ws_handler))
        .merge(robot_routes)
        .merge(upload_routes)
        .nest_service(FILES_ROUTE, files)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
