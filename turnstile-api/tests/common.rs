//! Shared helpers for HTTP tests.

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::Request,
    response::Response,
    Router,
};
use tower::ServiceExt;
use turnstile_api::{create_api_router, ApiConfig, AppState};
use turnstile_test_utils::fixtures::{self, Stack};
use turnstile_test_utils::PolicyConfig;

/// Full router over an in-memory stack, plus the stack for inspection.
pub async fn app_with(policy: PolicyConfig) -> (Router, AppState, Stack) {
    let stack = fixtures::memory_stack_with(policy.clone()).await;
    let state = AppState::new(
        ApiConfig::default(),
        policy,
        stack.cache.clone(),
        stack.limiter.clone(),
    );
    (create_api_router(state.clone()), state, stack)
}

pub fn json_post(uri: &str, body: serde_json::Value) -> Result<Request<Body>, String> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .map_err(|e| e.to_string())
}

pub fn bare(method: &str, uri: &str) -> Result<Request<Body>, String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .map_err(|e| e.to_string())
}

pub async fn send(app: &Router, request: Request<Body>) -> Result<Response, String> {
    app.clone()
        .oneshot(request)
        .await
        .map_err(|e| format!("Request failed: {:?}", e))
}

pub async fn body_json(response: Response) -> Result<serde_json::Value, String> {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

pub fn header(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
