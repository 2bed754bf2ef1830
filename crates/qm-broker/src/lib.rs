//! Queue Mediator Broker
//!
//! Broker abstraction used by the relay pipeline:
//! - BrokerChannel: the AMQP-style operations the relay depends on
//! - BrokerConnector: opens a connection and channel for a server URI
//! - BrokerConnectionManager: the process-wide shared channel
//! - Publisher: ephemeral connection per publish call

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub mod manager;
pub mod publisher;

#[cfg(feature = "amqp")]
pub mod amqp;
#[cfg(any(test, feature = "memory"))]
pub mod memory;

pub use manager::{BrokerConnectionManager, InspectedMessage};
pub use publisher::Publisher;

#[cfg(feature = "amqp")]
pub use amqp::{AmqpChannel, AmqpConnector};
#[cfg(any(test, feature = "memory"))]
pub use memory::{BrokerEvent, InMemoryBroker};

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Broker not initialized, call init first")]
    NotInitialized,

    #[error("Broker already initialized")]
    AlreadyInitialized,

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Consume error: {0}")]
    Consume(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BrokerError>;

/// A message delivered to a consumer
#[derive(Debug, Clone)]
pub struct BrokerDelivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

pub type DeliveryStream = BoxStream<'static, Result<BrokerDelivery>>;

/// An active consumer: its tag and the stream of deliveries.
/// The stream ends once the consumer is cancelled.
pub struct BrokerConsumer {
    pub consumer_tag: String,
    pub deliveries: DeliveryStream,
}

/// AMQP 0-9-1 style channel operations
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare the queue if absent (idempotent)
    async fn assert_queue(&self, queue: &str) -> Result<()>;

    /// Start consuming with manual acknowledgement
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<BrokerConsumer>;

    /// Acknowledge one delivery
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// Stop a consumer. Resolves once the broker confirmed the cancel.
    async fn cancel(&self, consumer_tag: &str) -> Result<()>;

    /// Publish directly to a queue through the default exchange
    async fn send_to_queue(&self, queue: &str, body: &[u8], persistent: bool) -> Result<()>;

    /// Fetch a single message without acknowledgement, if one is waiting
    async fn get_one(&self, queue: &str) -> Result<Option<Vec<u8>>>;

    /// Close the channel and its connection
    async fn close(&self) -> Result<()>;
}

/// Opens a connection and a channel for a broker URI
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, uri: &str) -> Result<Arc<dyn BrokerChannel>>;
}
