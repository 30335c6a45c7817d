//! Administrative Endpoints
//!
//! Cache and quota maintenance. None of these routes pass through the quota
//! gate, and every store fault degrades to the component's safe default.
//!
//! - GET    /admin/cache/stats
//! - POST   /admin/cache/invalidate       {"pattern": "dataset_list:*"}
//! - POST   /admin/cache/flush
//! - GET    /admin/ratelimit/{class}/{identity}
//! - DELETE /admin/ratelimit/{class}/{identity}

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use turnstile_core::{QuotaKey, QuotaSpec};
use turnstile_storage::CacheStats;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateRequest {
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub pattern: String,
    pub deleted: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushResponse {
    /// Whether a flush was sent to the store.
    pub flushed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatusResponse {
    pub class: String,
    pub identity: String,
    /// Quota as configured, e.g. "20/minute".
    pub quota: String,
    pub limit: u32,
    pub window: u64,
    pub remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaResetResponse {
    pub class: String,
    pub identity: String,
    /// Whether a window existed and was removed.
    pub reset: bool,
}

// ============================================================================
// CACHE HANDLERS
// ============================================================================

/// GET /admin/cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

/// POST /admin/cache/invalidate
pub async fn cache_invalidate(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> ApiResult<Json<InvalidateResponse>> {
    let pattern = req
        .pattern
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::missing_field("pattern"))?;

    let deleted = state.cache.invalidate_pattern(&pattern).await;
    Ok(Json(InvalidateResponse { pattern, deleted }))
}

/// POST /admin/cache/flush
pub async fn cache_flush(State(state): State<AppState>) -> Json<FlushResponse> {
    state.cache.flush_all().await;
    Json(FlushResponse {
        flushed: state.cache.is_enabled(),
    })
}

// ============================================================================
// QUOTA HANDLERS
// ============================================================================

fn quota_for(state: &AppState, class: &str) -> ApiResult<QuotaSpec> {
    state
        .policy
        .quota(class)
        .map_err(|e| ApiError::invalid_policy(e.to_string()))
}

/// GET /admin/ratelimit/{class}/{identity}
pub async fn quota_status(
    State(state): State<AppState>,
    Path((class, identity)): Path<(String, String)>,
) -> ApiResult<Json<QuotaStatusResponse>> {
    let quota = quota_for(&state, &class)?;
    let key = QuotaKey::new(class.as_str(), identity.as_str());
    let remaining = state
        .limiter
        .get_remaining(&key.to_string(), quota.count, quota.window_secs())
        .await;

    Ok(Json(QuotaStatusResponse {
        quota: quota.to_string(),
        limit: quota.count,
        window: quota.window_secs(),
        remaining,
        class,
        identity,
    }))
}

/// DELETE /admin/ratelimit/{class}/{identity}
pub async fn quota_reset(
    State(state): State<AppState>,
    Path((class, identity)): Path<(String, String)>,
) -> Json<QuotaResetResponse> {
    let key = QuotaKey::new(class.as_str(), identity.as_str());
    let reset = state.limiter.reset_limit(&key.to_string()).await;
    info!(key = %key, reset, "Administrative quota reset");
    Json(QuotaResetResponse {
        class,
        identity,
        reset,
    })
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the administrative router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/cache/stats", get(cache_stats))
        .route("/cache/invalidate", post(cache_invalidate))
        .route("/cache/flush", post(cache_flush))
        .route(
            "/ratelimit/:class/:identity",
            get(quota_status).delete(quota_reset),
        )
        .with_state(state)
}
