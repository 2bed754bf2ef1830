//! Publish endpoint
//!
//! `requestId` is taken from `data.requestId`; the queued payload is
//! `data.esbBody` when present, otherwise the whole body. An empty id counts
//! as absent: it is neither injected into the payload nor tracked.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use qm_relay::PublishError;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::{parse_body, AppState};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishData {
    pub success: bool,
    pub esb_body: Value,
    pub message: &'static str,
}

#[derive(Serialize)]
pub struct PublishResponse {
    pub data: PublishData,
}

fn respond(status: StatusCode, data: PublishData) -> (StatusCode, Json<Value>) {
    let body = serde_json::to_value(PublishResponse { data }).unwrap_or(Value::Null);
    (status, Json(body))
}

pub async fn publish_handler(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "message": "Invalid content type please use application/json",
            })),
        );
    }

    let body = parse_body(&body).unwrap_or(Value::Null);
    let request_id = match body.pointer("/data/requestId") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let payload = match body.pointer("/data/esbBody") {
        Some(esb_body) if !esb_body.is_null() => esb_body.clone(),
        _ => body,
    };

    match state.publish.publish(&queue, payload, request_id).await {
        Ok(()) => respond(
            StatusCode::OK,
            PublishData {
                success: true,
                esb_body: json!({"status": "Your request is now queued for processing"}),
                message: "You will receive a response shortly",
            },
        ),
        Err(PublishError::InvalidDestination(_)) => respond(
            StatusCode::BAD_REQUEST,
            PublishData {
                success: false,
                esb_body: Value::String(String::new()),
                message: "Invalid Destination",
            },
        ),
        Err(e) => {
            error!(queue = %queue, error = %e, "Publish failed");
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                PublishData {
                    success: false,
                    esb_body: Value::String(String::new()),
                    message: "Something went wrong while queueing your request",
                },
            )
        }
    }
}
