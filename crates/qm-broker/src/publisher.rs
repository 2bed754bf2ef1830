//! Publisher - enqueue inbound requests for the consumers
//!
//! Each call opens its own connection and channel, independent of the shared
//! `BrokerConnectionManager`, and closes them before returning. Failures are
//! reported as `false`; nothing is raised to the caller.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{BrokerConnector, Result};

pub struct Publisher {
    connector: Arc<dyn BrokerConnector>,
}

impl Publisher {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self { connector }
    }

    /// Publish `message` to `queue_name` on the broker at `server_uri`.
    /// Returns true once the message was handed to the broker.
    pub async fn publish(&self, server_uri: &str, queue_name: &str, message: &serde_json::Value) -> bool {
        match self.try_publish(server_uri, queue_name, message).await {
            Ok(()) => {
                info!(queue = %queue_name, "Sent message to queue");
                true
            }
            Err(e) => {
                error!(queue = %queue_name, error = %e, "Failed to publish message");
                false
            }
        }
    }

    async fn try_publish(&self, server_uri: &str, queue_name: &str, message: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(message)?;
        let channel = self.connector.connect(server_uri).await?;

        let sent = async {
            channel.assert_queue(queue_name).await?;
            channel.send_to_queue(queue_name, &body, false).await
        }
        .await;

        if let Err(e) = channel.close().await {
            warn!(queue = %queue_name, error = %e, "Failed to close publish connection");
        } else {
            debug!(queue = %queue_name, "Closed publish connection");
        }

        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BrokerEvent, InMemoryBroker};
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_sends_non_persistent_and_closes() {
        let broker = InMemoryBroker::new();
        let publisher = Publisher::new(Arc::new(broker.clone()));

        let ok = publisher
            .publish("amqp://localhost", "X", &json!({"requestId": "R1", "amount": 5}))
            .await;

        assert!(ok);
        let sent = broker.sent_to("X");
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].1);

        let body: serde_json::Value = serde_json::from_slice(&sent[0].0).unwrap();
        assert_eq!(body["requestId"], "R1");

        let events = broker.events();
        assert_eq!(events.first(), Some(&BrokerEvent::Connected));
        assert_eq!(events.last(), Some(&BrokerEvent::Closed));
    }

    #[tokio::test]
    async fn test_publish_unreachable_returns_false() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);
        let publisher = Publisher::new(Arc::new(broker.clone()));

        assert!(!publisher.publish("amqp://localhost", "X", &json!({})).await);
        assert!(broker.events().is_empty());
    }

    #[tokio::test]
    async fn test_publish_assert_failure_still_closes() {
        let broker = InMemoryBroker::new();
        broker.fail_queue("X");
        let publisher = Publisher::new(Arc::new(broker.clone()));

        assert!(!publisher.publish("amqp://localhost", "X", &json!({})).await);
        assert_eq!(broker.events().last(), Some(&BrokerEvent::Closed));
    }

    #[cfg(feature = "amqp")]
    #[tokio::test]
    async fn test_publish_to_unreachable_rabbitmq_returns_false() {
        let publisher = Publisher::new(Arc::new(crate::amqp::AmqpConnector::new(false)));
        assert!(!publisher.publish("amqp://127.0.0.1:1/%2f", "X", &json!({"a": 1})).await);
    }
}
