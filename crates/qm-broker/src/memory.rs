//! In-process broker
//!
//! Implements both `BrokerConnector` and `BrokerChannel` over shared state.
//! Every operation is recorded as a `BrokerEvent` so callers can assert on
//! ordering (cancel before consume, ack after forward, dead-letter sends).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;

use crate::{BrokerChannel, BrokerConnector, BrokerConsumer, BrokerDelivery, BrokerError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Connected,
    QueueAsserted(String),
    Consumed { queue: String, consumer_tag: String },
    Cancelled(String),
    Acked(u64),
    Sent { queue: String, body: Vec<u8>, persistent: bool },
    Closed,
}

struct ActiveConsumer {
    consumer_tag: String,
    queue: String,
    tx: mpsc::UnboundedSender<Result<BrokerDelivery>>,
}

struct State {
    reachable: bool,
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    consumers: Vec<ActiveConsumer>,
    failing_queues: HashSet<String>,
    next_delivery_tag: u64,
    events: Vec<BrokerEvent>,
}

impl State {
    /// Hand the body to the first live consumer of the queue, or park it
    fn route(&mut self, queue: &str, body: Vec<u8>) {
        self.consumers.retain(|c| !c.tx.is_closed());

        if let Some(consumer) = self.consumers.iter().find(|c| c.queue == queue) {
            self.next_delivery_tag += 1;
            let delivery = BrokerDelivery {
                delivery_tag: self.next_delivery_tag,
                body,
                redelivered: false,
            };
            if let Err(e) = consumer.tx.unbounded_send(Ok(delivery)) {
                let returned = e.into_inner();
                if let Ok(delivery) = returned {
                    self.queues.entry(queue.to_string()).or_default().push_back(delivery.body);
                }
            }
            return;
        }

        self.queues.entry(queue.to_string()).or_default().push_back(body);
    }

    fn check_queue(&self, queue: &str) -> Result<()> {
        if self.failing_queues.contains(queue) {
            return Err(BrokerError::Channel(format!("queue {} is unavailable", queue)));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                reachable: true,
                queues: HashMap::new(),
                consumers: Vec::new(),
                failing_queues: HashSet::new(),
                next_delivery_tag: 0,
                events: Vec::new(),
            })),
        }
    }

    /// When false, `connect` fails with a connection error
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Make assert/send on this queue fail
    pub fn fail_queue(&self, queue: &str) {
        self.state.lock().failing_queues.insert(queue.to_string());
    }

    /// Enqueue a message as an external producer would
    pub fn push(&self, queue: &str, body: &[u8]) {
        self.state.lock().route(queue, body.to_vec());
    }

    pub fn events(&self) -> Vec<BrokerEvent> {
        self.state.lock().events.clone()
    }

    /// Bodies sent to a queue through `send_to_queue`, with their persistence flag
    pub fn sent_to(&self, queue: &str) -> Vec<(Vec<u8>, bool)> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                BrokerEvent::Sent { queue: q, body, persistent } if q == queue => {
                    Some((body.clone(), *persistent))
                }
                _ => None,
            })
            .collect()
    }

    /// Messages parked in a queue with no consumer
    pub fn queued(&self, queue: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn acked(&self) -> Vec<u64> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                BrokerEvent::Acked(tag) => Some(*tag),
                _ => None,
            })
            .collect()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                BrokerEvent::Cancelled(tag) => Some(tag.clone()),
                _ => None,
            })
            .collect()
    }

    /// Consumer tags currently bound to a queue
    pub fn active_consumers(&self, queue: &str) -> Vec<String> {
        self.state
            .lock()
            .consumers
            .iter()
            .filter(|c| c.queue == queue && !c.tx.is_closed())
            .map(|c| c.consumer_tag.clone())
            .collect()
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(&self, _uri: &str) -> Result<Arc<dyn BrokerChannel>> {
        let mut state = self.state.lock();
        if !state.reachable {
            return Err(BrokerError::Connection("connect ECONNREFUSED".to_string()));
        }
        state.events.push(BrokerEvent::Connected);
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl BrokerChannel for InMemoryBroker {
    async fn assert_queue(&self, queue: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check_queue(queue)?;
        state.queues.entry(queue.to_string()).or_default();
        state.events.push(BrokerEvent::QueueAsserted(queue.to_string()));
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<BrokerConsumer> {
        let mut state = self.state.lock();
        if state.consumers.iter().any(|c| c.consumer_tag == consumer_tag && !c.tx.is_closed()) {
            return Err(BrokerError::Consume(format!("consumer tag {} already in use", consumer_tag)));
        }

        let (tx, rx) = mpsc::unbounded();
        state.consumers.push(ActiveConsumer {
            consumer_tag: consumer_tag.to_string(),
            queue: queue.to_string(),
            tx,
        });
        state.events.push(BrokerEvent::Consumed {
            queue: queue.to_string(),
            consumer_tag: consumer_tag.to_string(),
        });

        let parked: Vec<Vec<u8>> = state
            .queues
            .get_mut(queue)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default();
        for body in parked {
            state.route(queue, body);
        }

        Ok(BrokerConsumer {
            consumer_tag: consumer_tag.to_string(),
            deliveries: rx.boxed(),
        })
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.state.lock().events.push(BrokerEvent::Acked(delivery_tag));
        Ok(())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        let mut state = self.state.lock();
        // Dropping the sender ends the consumer's delivery stream
        state.consumers.retain(|c| c.consumer_tag != consumer_tag);
        state.events.push(BrokerEvent::Cancelled(consumer_tag.to_string()));
        Ok(())
    }

    async fn send_to_queue(&self, queue: &str, body: &[u8], persistent: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.check_queue(queue)?;
        state.events.push(BrokerEvent::Sent {
            queue: queue.to_string(),
            body: body.to_vec(),
            persistent,
        });
        state.route(queue, body.to_vec());
        Ok(())
    }

    async fn get_one(&self, queue: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock();
        Ok(state.queues.get_mut(queue).and_then(|q| q.pop_front()))
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.consumers.clear();
        state.events.push(BrokerEvent::Closed);
        Ok(())
    }
}
