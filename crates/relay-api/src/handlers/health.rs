//! Liveness endpoint.

use axum::Json;
use serde_json::{json, Value};

/// Basic liveness check; the process is up and serving.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "sintegre-relay",
    }))
}
