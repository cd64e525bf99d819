pub mod health;
pub mod processing;
pub mod spectra;

use crate::core::queue::TaskQueue;
use crate::domain::ports::SpectraRepository;
use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub queue: TaskQueue,
    pub repository: Arc<dyn SpectraRepository>,
}

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        // Processing
        .route("/processing/:id", post(processing::request_processing))
        .route("/processing/status/:task_id", get(processing::task_status))
        // HSDB proxy
        .route("/spectra", get(spectra::list_spectra))
        .route("/spectra/:id", get(spectra::get_spectrum))
        .fallback(not_found)
        .with_state(state)
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}
