use axum::http::Uri;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::metrics::metrics_handler;
use crate::routes;
use crate::state::AppState;

/// Session and proxy routes under `/api/v1`, plus `/health` and `/metrics`.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::router())
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}
