//! HTTP route handlers

pub mod cancel;
pub mod chat;
pub mod conversations;
pub mod tools;

use axum::Json;
use serde_json::{json, Value};

/// Liveness probe
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
