//! Request status lookups

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use qm_relay::tracking_id;
use serde_json::{json, Value};

use crate::{parse_body, AppState};

fn lookup(state: &AppState, request_id: &str) -> (StatusCode, Json<Value>) {
    match state.tracker.get(request_id) {
        Some(record) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Request status retrieved successfully",
                "data": record,
            })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "message": "Request ID not found in tracker. It may be expired or unknown.",
                "requestId": request_id,
            })),
        ),
    }
}

pub async fn status_by_path_handler(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    let request_id = request_id.trim();
    if request_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "Missing requestId"})),
        );
    }
    lookup(&state, request_id)
}

pub async fn status_by_body_handler(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<Value>) {
    match parse_body(&body).as_ref().and_then(tracking_id) {
        Some(request_id) => lookup(&state, &request_id),
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "Missing requestId in request body"})),
        ),
    }
}
