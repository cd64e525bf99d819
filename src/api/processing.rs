use super::AppState;
use crate::domain::model::ProcessingRequest;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ProcessingQuery {
    pub record_type: Option<String>,
}

pub async fn request_processing(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ProcessingQuery>,
) -> impl IntoResponse {
    let record_type = query
        .record_type
        .clone()
        .unwrap_or_else(|| "spectrum".to_string());
    let request = ProcessingRequest {
        spectrum_id: id,
        record_type: query.record_type,
    };

    match state.queue.submit(request).await {
        Ok(task_id) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "message": format!("Received processing request for {} with id {}", record_type, id),
                "task_id": task_id
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!("Rejected processing request for {}: {}", id, e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.user_friendly_message() })),
            )
                .into_response()
        }
    }
}

pub async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    let info = match Uuid::parse_str(&task_id) {
        Ok(uuid) => state.queue.info(&uuid).await,
        Err(_) => None,
    };
    match info {
        Some(info) => (StatusCode::OK, Json(json!(info))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Unknown task {}", task_id) })),
        )
            .into_response(),
    }
}
