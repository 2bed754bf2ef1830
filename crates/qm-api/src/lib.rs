//! Queue Mediator HTTP API
//!
//! Thin axum surface over the relay core:
//! - `POST /publish/:queue` enqueue a request on a publish queue
//! - `GET /request-status/:request_id`, `POST /request-status`, `POST /tracker`
//! - `GET /queue/:queue/consume-one` single-message inspection
//! - `GET /health`, `GET /metrics`

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use qm_broker::BrokerConnectionManager;
use qm_relay::{PublishService, RequestTracker};
use tower_http::trace::TraceLayer;

mod health;
mod publish;
mod queue;
mod status;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub publish: Arc<PublishService>,
    pub tracker: Arc<RequestTracker>,
    pub broker: Arc<BrokerConnectionManager>,
    /// Prometheus render handle; `None` when no recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/metrics", get(health::metrics_handler))
        .route("/publish/:queue", post(publish::publish_handler))
        .route("/request-status/:request_id", get(status::status_by_path_handler))
        .route("/request-status", post(status::status_by_body_handler))
        .route("/tracker", post(status::status_by_body_handler))
        .route("/queue/:queue/consume-one", get(queue::consume_one_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// JSON body, or the raw text when it does not parse
pub(crate) fn parse_body(bytes: &[u8]) -> Option<serde_json::Value> {
    if bytes.is_empty() {
        return None;
    }
    Some(
        serde_json::from_slice(bytes)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())),
    )
}
