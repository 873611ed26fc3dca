//! API routes for the CAFF Share server.

pub mod caffs;
pub mod comments;
pub mod users;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Creates the main API router with all routes mounted.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

fn api_routes(state: AppState) -> Router {
    Router::new()
        .nest("/caffs", caffs::router(state.clone()))
        .nest("/comments", comments::router(state.clone()))
        .nest("/users", users::router(state))
}
