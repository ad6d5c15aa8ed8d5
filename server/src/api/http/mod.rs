//! HTTP API handlers

mod catalog;
mod health;
mod session;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Session routes
        .route("/session", get(session::get_session))
        .route("/session/events", get(session::session_events))
        .route("/session/console", get(session::get_console))
        .route("/session/tree", get(session::get_tree))
        .route("/session/launch", post(session::launch))
        .route("/session/install/cancel", post(session::cancel_install))
        .route("/session/dev-server/stop", post(session::stop_dev_server))
        // Catalog routes
        .route("/templates", get(catalog::list_templates))
        .route("/templates/detect", post(catalog::detect_template))
        .route("/commands/infer", post(catalog::infer_command));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
