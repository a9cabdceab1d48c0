use crate::api::{handlers, AppState};
use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    build_router_with_cors(state, CorsLayer::permissive())
}

/// Build the router, allowing only `origins` (any origin when empty)
pub fn build_router_for_origins(state: AppState, origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    let cors = if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET])
            .allow_headers([header::CONTENT_TYPE])
    };
    build_router_with_cors(state, cors)
}

fn build_router_with_cors(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        // Search
        .route("/search", get(handlers::search))
        .route("/search/config", get(handlers::search_config))
        // Reindex progress
        .route("/reindex/status", get(handlers::reindex_status))
        // Metrics
        .route("/metrics", get(handlers::metrics))
        // Add state
        .with_state(state)
        // Add middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false))
                .on_response(DefaultOnResponse::new()),
        )
        .layer(cors)
}
