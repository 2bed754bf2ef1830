//! ConsumerRegistry - one live consumer per queue
//!
//! Each queue name owns a slot guarded by its own async mutex, so concurrent
//! `register` calls for the same queue are serialized while distinct queues
//! proceed independently. A rebind cancels the previous consumer tag, waits
//! for the broker to confirm, then lets the old worker finish the deliveries
//! already buffered for it before the new consumer is created.
//!
//! Per queue, messages are handled one at a time: parse, track, forward, then
//! acknowledge once the forward attempt has completed.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use qm_broker::{BrokerChannel, BrokerConnectionManager, BrokerDelivery, DeliveryStream};
use qm_common::{ConsumerBinding, SubQueueConfig};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::extract::consumer_request_id;
use crate::forwarder::{ForwardRequest, MessageForwarder};
use crate::metrics;
use crate::tracker::{RequestDetails, RequestTracker};
use crate::Result;

/// How long a cancelled worker may keep draining before it is aborted
const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// What a `register` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Same method and url already bound; nothing touched
    Unchanged,
    /// First consumer for the queue
    Created,
    /// Previous consumer cancelled and replaced
    Rebound,
}

struct ActiveConsumer {
    binding: ConsumerBinding,
    task: JoinHandle<()>,
}

type ConsumerSlot = Arc<Mutex<Option<ActiveConsumer>>>;

pub struct ConsumerRegistry {
    broker: Arc<BrokerConnectionManager>,
    tracker: Arc<RequestTracker>,
    forwarder: Arc<MessageForwarder>,
    slots: DashMap<String, ConsumerSlot>,
}

impl ConsumerRegistry {
    pub fn new(
        broker: Arc<BrokerConnectionManager>,
        tracker: Arc<RequestTracker>,
        forwarder: Arc<MessageForwarder>,
    ) -> Self {
        Self {
            broker,
            tracker,
            forwarder,
            slots: DashMap::new(),
        }
    }

    fn slot(&self, queue_name: &str) -> ConsumerSlot {
        self.slots.entry(queue_name.to_string()).or_default().clone()
    }

    /// Bind `queue_name` to forward with `method` to `url`.
    pub async fn register(&self, queue_name: &str, method: &str, url: &str) -> Result<RegisterOutcome> {
        let slot = self.slot(queue_name);
        let mut active = slot.lock().await;

        if let Some(current) = active.as_ref() {
            if current.binding.targets(method, url) {
                debug!(queue = %queue_name, "Consumer binding unchanged");
                return Ok(RegisterOutcome::Unchanged);
            }
        }

        let channel = self.broker.get_channel()?;

        let rebound = match active.take() {
            Some(previous) => {
                let tag = previous.binding.consumer_tag.clone();
                if let Err(e) = channel.cancel(&tag).await {
                    *active = Some(previous);
                    return Err(e.into());
                }
                info!(
                    queue = %queue_name,
                    consumer_tag = %tag,
                    old_url = %previous.binding.target_url,
                    new_url = %url,
                    "Cancelled previous consumer for rebind"
                );
                drain_worker(queue_name, previous.task).await;
                true
            }
            None => false,
        };

        channel.assert_queue(queue_name).await?;

        let consumer_tag = format!("qm-{}", Uuid::new_v4());
        let consumer = channel.consume(queue_name, &consumer_tag).await?;

        let binding = ConsumerBinding {
            queue_name: queue_name.to_string(),
            consumer_tag: consumer.consumer_tag.clone(),
            method: method.to_string(),
            target_url: url.to_string(),
        };

        let worker = QueueWorker {
            binding: binding.clone(),
            channel,
            tracker: self.tracker.clone(),
            forwarder: self.forwarder.clone(),
        };
        let task = tokio::spawn(worker.run(consumer.deliveries));

        info!(
            queue = %queue_name,
            consumer_tag = %binding.consumer_tag,
            method = %method,
            url = %url,
            "Waiting for messages"
        );
        *active = Some(ActiveConsumer { binding, task });

        Ok(if rebound { RegisterOutcome::Rebound } else { RegisterOutcome::Created })
    }

    /// Register every running subscription, in order. Failures are logged and
    /// do not stop the remaining entries. Returns the number of live bindings
    /// touched (created, rebound or unchanged).
    pub async fn register_all(&self, sub_queues: &[SubQueueConfig]) -> usize {
        let mut bound = 0;
        for sub in sub_queues {
            if !sub.is_running() {
                warn!(queue = %sub.queue_name, status = %sub.queue_status, "Skipping subscription queue that is not running");
                continue;
            }

            match self
                .register(&sub.queue_name, &sub.channel_http_method, &sub.channel_url)
                .await
            {
                Ok(outcome) => {
                    debug!(queue = %sub.queue_name, outcome = ?outcome, "Subscription registered");
                    bound += 1;
                }
                Err(e) => error!(queue = %sub.queue_name, error = %e, "Failed to register consumer"),
            }
        }
        bound
    }

    /// Current binding for a queue, if any
    pub async fn binding(&self, queue_name: &str) -> Option<ConsumerBinding> {
        let slot = self.slots.get(queue_name).map(|entry| entry.value().clone())?;
        let active = slot.lock().await;
        active.as_ref().map(|a| a.binding.clone())
    }

    pub async fn bindings(&self) -> Vec<ConsumerBinding> {
        let slots: Vec<ConsumerSlot> = self.slots.iter().map(|entry| entry.value().clone()).collect();

        let mut bindings = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(active) = slot.lock().await.as_ref() {
                bindings.push(active.binding.clone());
            }
        }
        bindings.sort_by(|a, b| a.queue_name.cmp(&b.queue_name));
        bindings
    }

    /// Cancel every consumer and give in-flight messages a short grace period.
    /// Unfinished messages stay unacknowledged and are redelivered later.
    pub async fn shutdown(&self) {
        let channel = self.broker.get_channel().ok();
        let slots: Vec<ConsumerSlot> = self.slots.iter().map(|entry| entry.value().clone()).collect();

        for slot in slots {
            let Some(active) = slot.lock().await.take() else {
                continue;
            };

            let queue = &active.binding.queue_name;
            if let Some(channel) = &channel {
                if let Err(e) = channel.cancel(&active.binding.consumer_tag).await {
                    warn!(queue = %queue, error = %e, "Failed to cancel consumer during shutdown");
                }
            }

            drain_worker(queue, active.task).await;
        }

        info!("All consumers stopped");
    }
}

/// Wait for a cancelled consumer's worker to handle and ack what it already
/// received. Past the grace period the worker is aborted and its unacked
/// deliveries are left for the broker to redeliver.
async fn drain_worker(queue: &str, mut task: JoinHandle<()>) {
    if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
        warn!(queue = %queue, "Consumer still busy after grace period, aborting");
        task.abort();
    }
}

/// Sequential message handler for one consumer
struct QueueWorker {
    binding: ConsumerBinding,
    channel: Arc<dyn BrokerChannel>,
    tracker: Arc<RequestTracker>,
    forwarder: Arc<MessageForwarder>,
}

impl QueueWorker {
    async fn run(self, mut deliveries: DeliveryStream) {
        while let Some(delivery) = deliveries.next().await {
            match delivery {
                Ok(delivery) => self.handle(delivery).await,
                Err(e) => error!(queue = %self.binding.queue_name, error = %e, "Consumer delivery error"),
            }
        }

        debug!(
            queue = %self.binding.queue_name,
            consumer_tag = %self.binding.consumer_tag,
            "Consumer stream ended"
        );
    }

    async fn handle(&self, delivery: BrokerDelivery) {
        let queue = &self.binding.queue_name;
        metrics::record_consumed(queue);

        let payload = parse_payload(&delivery.body);
        let request_id = consumer_request_id(&payload);
        debug!(queue = %queue, request_id = ?request_id, redelivered = delivery.redelivered, "Received message");

        if let Some(id) = &request_id {
            self.tracker.mark_queued(
                id,
                RequestDetails::new(Some(queue), Some(&self.binding.target_url), Some(&self.binding.method)),
            );
        }

        let request = ForwardRequest {
            source_queue: queue.clone(),
            method: self.binding.method.clone(),
            url: self.binding.target_url.clone(),
            payload,
            request_id,
        };
        self.forwarder.forward(&request).await;

        if let Err(e) = self.channel.ack(delivery.delivery_tag).await {
            error!(queue = %queue, delivery_tag = delivery.delivery_tag, error = %e, "Failed to acknowledge message");
        }
    }
}

/// JSON when it parses, otherwise the raw text as a string payload
fn parse_payload(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload_falls_back_to_text() {
        assert_eq!(parse_payload(br#"{"a":1}"#)["a"], 1);
        assert_eq!(parse_payload(b"not json"), Value::String("not json".to_string()));
    }
}
