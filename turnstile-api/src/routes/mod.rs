//! REST API Routes Module
//!
//! Route modules and the top-level router assembly.

pub mod admin;
pub mod health;
pub mod quota;

use axum::{middleware::from_fn, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

/// Create the complete router: health, admin, gated admission and metrics.
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/quota", quota::create_router(&state))
        .nest("/admin", admin::create_router(state.clone()))
        .nest("/health", health::create_router(state))
        .route("/metrics", get(metrics_handler))
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
}
