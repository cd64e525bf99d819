use super::AppState;
use axum::{extract::State, Json};
use serde_json::{json, Value};

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "spectral-processor",
        "version": env!("CARGO_PKG_VERSION"),
        "queue": state.queue.stats().await
    }))
}
