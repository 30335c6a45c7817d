//! Turnstile API Server Entry Point
//!
//! Loads configuration, connects the cache and rate limiter to the store,
//! and starts the Axum HTTP server.

use std::net::SocketAddr;

use turnstile_api::telemetry::{init_tracer, TelemetryConfig};
use turnstile_api::{create_api_router, ApiConfig, ApiError, ApiResult, AppState};
use turnstile_core::PolicyConfig;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracer(&telemetry_config)?;

    let api_config = ApiConfig::from_env()?;
    api_config.validate()?;
    let policy = PolicyConfig::from_env();

    let addr = api_config.bind_addr()?;
    let state = AppState::connect(api_config, policy).await;
    tracing::info!(
        cache = %state.cache.state(),
        rate_limiter = %state.limiter.state(),
        failure_policy = %state.limiter.failure_policy(),
        "Components ready"
    );

    let app = create_api_router(state);

    tracing::info!(%addr, "Starting turnstile API server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
