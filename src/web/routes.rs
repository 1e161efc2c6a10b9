use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// API Routes - REST API for programmatic access
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Query endpoints
            .route("/nl-query", post(handlers::api::nl_query))
            .route("/query", post(handlers::api::execute_query))
            // Schema
            .route("/schema", get(handlers::api::get_schema))
            .route("/schema/refresh", post(handlers::api::refresh_schema))
            // Result cache management
            .route("/cache", delete(handlers::api::clear_cache))
            .route("/cache/stats", get(handlers::api::cache_stats))
            .route("/cache/enabled", put(handlers::api::set_cache_enabled))
            .route("/cache/invalidate/{table}", post(handlers::api::invalidate_table))
            // System status
            .route("/status", get(handlers::api::system_status)),
    )
}
