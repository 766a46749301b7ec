use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// Liveness probe: reports the session count and the config the process
/// booted with, no external dependency checks (there are none to check).
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "activeSessions": state.user_sessions.len(),
        "bind": state.config.gateway.bind,
        "port": state.config.gateway.port,
    }))
}
