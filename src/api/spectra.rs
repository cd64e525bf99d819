use super::AppState;
use crate::utils::error::ProcessorError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

fn upstream_error(e: ProcessorError) -> axum::response::Response {
    tracing::error!("❌ HSDB request failed: {}", e);
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "error": e.user_friendly_message() })),
    )
        .into_response()
}

pub async fn list_spectra(State(state): State<AppState>) -> impl IntoResponse {
    match state.repository.list_spectra().await {
        Ok(spectra) => (StatusCode::OK, Json(spectra)).into_response(),
        Err(e) => upstream_error(e),
    }
}

pub async fn get_spectrum(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.repository.get_spectrum(id).await {
        Ok(spectrum) => (StatusCode::OK, Json(json!({ "spectrum": spectrum }))).into_response(),
        Err(e) => upstream_error(e),
    }
}
