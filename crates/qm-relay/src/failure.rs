//! FailureRouter - dead-letter publishing for failed forwards
//!
//! Writes a persistent `FailureEnvelope` to `<source>_FAILED` on the shared
//! channel. Runs inside failure handling already, so nothing is returned to
//! the caller: a failed dead-letter publish is logged and counted.

use std::sync::Arc;

use qm_broker::BrokerConnectionManager;
use qm_common::{failed_queue_name, ErrorInfo, FailureEnvelope};
use serde_json::Value;
use tracing::{error, warn};

use crate::metrics;

pub struct FailureRouter {
    broker: Arc<BrokerConnectionManager>,
}

impl FailureRouter {
    pub fn new(broker: Arc<BrokerConnectionManager>) -> Self {
        Self { broker }
    }

    pub async fn route_failure(&self, source_queue: &str, payload: &Value, target_url: &str, error: &ErrorInfo) {
        let failed_queue = failed_queue_name(source_queue);
        let envelope = FailureEnvelope::new(source_queue, target_url, error.clone(), payload.clone());

        match self.publish(&failed_queue, &envelope).await {
            Ok(()) => {
                metrics::record_dead_letter(source_queue, true);
                warn!(
                    queue = %source_queue,
                    failed_queue = %failed_queue,
                    "Message moved to failed queue due to forwarding error"
                );
            }
            Err(e) => {
                metrics::record_dead_letter(source_queue, false);
                error!(
                    failed_queue = %failed_queue,
                    error = %e,
                    "Failed to publish message to failed queue"
                );
            }
        }
    }

    async fn publish(&self, failed_queue: &str, envelope: &FailureEnvelope) -> qm_broker::Result<()> {
        let body = serde_json::to_vec(envelope)?;
        let channel = self.broker.get_channel()?;
        channel.assert_queue(failed_queue).await?;
        channel.send_to_queue(failed_queue, &body, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qm_broker::InMemoryBroker;
    use serde_json::json;

    async fn router(broker: &InMemoryBroker) -> FailureRouter {
        let manager = Arc::new(BrokerConnectionManager::new(Arc::new(broker.clone())));
        manager.init("amqp://localhost").await.unwrap();
        FailureRouter::new(manager)
    }

    #[tokio::test]
    async fn test_envelope_written_persistent() {
        let broker = InMemoryBroker::new();
        let router = router(&broker).await;
        let error = ErrorInfo::with_code("ECONNREFUSED", "connect ECONNREFUSED 127.0.0.1:1");

        router
            .route_failure("Q", &json!({"requestId": "R1"}), "http://down/bad", &error)
            .await;

        let sent = broker.sent_to("Q_FAILED");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1);

        let envelope: FailureEnvelope = serde_json::from_slice(&sent[0].0).unwrap();
        assert_eq!(envelope.source_queue, "Q");
        assert_eq!(envelope.target_url, "http://down/bad");
        assert_eq!(envelope.error, error);
        assert_eq!(envelope.payload, json!({"requestId": "R1"}));
    }

    #[tokio::test]
    async fn test_dead_letter_failure_is_swallowed() {
        let broker = InMemoryBroker::new();
        broker.fail_queue("Q_FAILED");
        let router = router(&broker).await;

        router
            .route_failure("Q", &json!({}), "http://down/bad", &ErrorInfo::default())
            .await;

        assert!(broker.sent_to("Q_FAILED").is_empty());
    }

    #[tokio::test]
    async fn test_uninitialized_broker_is_swallowed() {
        let broker = InMemoryBroker::new();
        let router = FailureRouter::new(Arc::new(BrokerConnectionManager::new(Arc::new(broker.clone()))));

        router
            .route_failure("Q", &json!({}), "http://down/bad", &ErrorInfo::default())
            .await;

        assert!(broker.events().is_empty());
    }
}
