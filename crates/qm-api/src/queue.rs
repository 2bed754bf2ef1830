use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::warn;

use crate::AppState;

/// Pop one message without acknowledgement, for debugging a queue
pub async fn consume_one_handler(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.broker.get_one(&queue).await {
        Ok(None) => (
            StatusCode::OK,
            Json(json!({"success": true, "message": "No messages available", "esbBody": null})),
        ),
        Ok(Some(message)) => {
            let esb_body = message.json.clone().unwrap_or_else(|| Value::String(message.raw.clone()));
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "Message consumed",
                    "esbBody": esb_body,
                    "raw": message.raw,
                })),
            )
        }
        Err(e) => {
            warn!(queue = %queue, error = %e, "Consume-one failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "message": e.to_string()})),
            )
        }
    }
}
