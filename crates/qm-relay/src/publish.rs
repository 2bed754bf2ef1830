//! PublishService - inbound requests onto publish queues
//!
//! Validates the destination against the configured publish queues, injects
//! the caller's request id into object payloads, hands the message to the
//! `Publisher`, and records the request as QUEUED once the broker accepted it.

use std::sync::Arc;

use parking_lot::RwLock;
use qm_broker::Publisher;
use qm_config::MediatorConfig;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::tracker::{RequestDetails, RequestTracker};

/// Configuration shared with the re-sync loop
pub type SharedConfig = Arc<RwLock<MediatorConfig>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Invalid Destination: {0}")]
    InvalidDestination(String),

    #[error("Failed to queue request on {0}")]
    QueueFailed(String),
}

pub struct PublishService {
    config: SharedConfig,
    publisher: Publisher,
    tracker: Arc<RequestTracker>,
}

impl PublishService {
    pub fn new(config: SharedConfig, publisher: Publisher, tracker: Arc<RequestTracker>) -> Self {
        Self { config, publisher, tracker }
    }

    pub async fn publish(
        &self,
        queue_name: &str,
        mut payload: Value,
        request_id: Option<String>,
    ) -> Result<(), PublishError> {
        let (server_uri, subscription) = {
            let config = self.config.read();
            if !config.is_publish_queue(queue_name) {
                warn!(queue = %queue_name, "Publish rejected, queue is not a publish queue");
                return Err(PublishError::InvalidDestination(queue_name.to_string()));
            }
            (
                config.queue_server.amqp_uri(),
                config.find_sub_queue(queue_name).cloned(),
            )
        };

        if let (Some(id), Value::Object(map)) = (&request_id, &mut payload) {
            map.insert("requestId".to_string(), Value::String(id.clone()));
        }

        if !self.publisher.publish(&server_uri, queue_name, &payload).await {
            return Err(PublishError::QueueFailed(queue_name.to_string()));
        }

        if let Some(id) = &request_id {
            let details = match &subscription {
                Some(sub) => RequestDetails::new(Some(queue_name), Some(&sub.channel_url), Some(&sub.channel_http_method)),
                None => RequestDetails::new(Some(queue_name), None, None),
            };
            self.tracker.mark_queued(id, details);
        }

        info!(queue = %queue_name, request_id = ?request_id, "Request queued for processing");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qm_broker::InMemoryBroker;
    use qm_common::{RequestStatus, SubQueueConfig};
    use serde_json::json;

    fn service(broker: &InMemoryBroker, tracker: Arc<RequestTracker>) -> PublishService {
        let config = MediatorConfig {
            pub_queues: vec!["X".to_string()],
            sub_queues: vec![SubQueueConfig {
                queue_name: "X".to_string(),
                channel_http_method: "POST".to_string(),
                channel_url: "http://down/ok".to_string(),
                queue_status: "RUN".to_string(),
            }],
            ..Default::default()
        };
        PublishService::new(
            Arc::new(RwLock::new(config)),
            Publisher::new(Arc::new(broker.clone())),
            tracker,
        )
    }

    #[tokio::test]
    async fn test_publish_injects_request_id_and_tracks() {
        let broker = InMemoryBroker::new();
        let tracker = Arc::new(RequestTracker::default());
        let service = service(&broker, tracker.clone());

        service
            .publish("X", json!({"amount": 5}), Some("R1".to_string()))
            .await
            .unwrap();

        let sent = broker.sent_to("X");
        let body: Value = serde_json::from_slice(&sent[0].0).unwrap();
        assert_eq!(body, json!({"amount": 5, "requestId": "R1"}));

        let record = tracker.get("R1").unwrap();
        assert_eq!(record.status, RequestStatus::Queued);
        assert_eq!(record.queue_name.as_deref(), Some("X"));
        assert_eq!(record.target_url.as_deref(), Some("http://down/ok"));
    }

    #[tokio::test]
    async fn test_unknown_queue_is_invalid_destination() {
        let broker = InMemoryBroker::new();
        let service = service(&broker, Arc::new(RequestTracker::default()));

        let err = service.publish("Y", json!({}), None).await.unwrap_err();
        assert_eq!(err, PublishError::InvalidDestination("Y".to_string()));
        assert!(broker.events().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_not_tracked() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);
        let tracker = Arc::new(RequestTracker::default());
        let service = service(&broker, tracker.clone());

        let err = service.publish("X", json!({}), Some("R1".to_string())).await.unwrap_err();
        assert_eq!(err, PublishError::QueueFailed("X".to_string()));
        assert!(tracker.get("R1").is_none());
    }
}
