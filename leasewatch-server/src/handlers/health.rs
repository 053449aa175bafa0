use axum::{extract::State, response::Json};
use serde_json::{Value, json};

use crate::infra::app_state::AppState;

pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let active = state.coordinator().active_runs().await.len();
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "active_scans": active,
        "sources": state.coordinator().registry().len(),
        "shutting_down": state.shutdown.is_cancelled(),
    }))
}

pub async fn ping_handler() -> &'static str {
    "pong"
}
