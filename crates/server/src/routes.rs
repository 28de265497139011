//! Route configuration.

use crate::auth::identity_middleware;
use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, put};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.server.max_upload_size).unwrap_or(usize::MAX);

    let api_routes = Router::new()
        // Health check (answers anonymous load balancer probes)
        .route("/v1/health", get(handlers::health_check))
        .route(
            "/v1/nodes",
            get(handlers::list_nodes).post(handlers::create_node),
        )
        .route(
            "/v1/nodes/{id}",
            get(handlers::get_node)
                .put(handlers::update_node)
                .delete(handlers::delete_node),
        )
        .route("/v1/nodes/{id}/acl", get(handlers::get_acl))
        .route("/v1/nodes/{id}/download", get(handlers::download_node))
        .route("/v1/nodes/{id}/indexes", get(handlers::list_indexes))
        .route(
            "/v1/nodes/{id}/indexes/{name}",
            put(handlers::put_index).delete(handlers::delete_index),
        )
        .route("/v1/locks", get(handlers::list_locks));

    // Order of execution: TraceLayer -> body limit -> identity -> handler
    api_routes
        .layer(middleware::from_fn_with_state(
            state.clone(),
            identity_middleware,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
