use axum::{
    Json, Router,
    http::{HeaderMap, header},
    routing::{get, post},
};
use subtle::ConstantTimeEq;

use crate::AppState;

mod admin;
mod callback;
mod webhook;

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/admin", get(admin::admin))
        .route("/webhooks", post(webhook::webhook))
        .route("/", post(webhook::webhook))
        .route("/callbacks/runner", post(callback::runner_callback))
}

async fn health() -> Json<serde_json::Value> { Json(serde_json::json!({ "ok": true })) }

/// Whether the request carries `Authorization: Bearer <expected>`, compared in constant
/// time. Always false when no token is configured.
pub fn bearer_authorized(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected.filter(|t| !t.is_empty()) else {
        return false;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
}
