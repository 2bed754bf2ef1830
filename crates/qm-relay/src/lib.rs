//! Queue Mediator Relay
//!
//! The consume -> forward -> dead-letter pipeline:
//! - RequestTracker: bounded request lifecycle records
//! - FailureRouter: `<queue>_FAILED` envelopes for failed forwards
//! - MessageForwarder: HTTP or ESB delivery with error normalization
//! - ConsumerRegistry: per-queue consumer binding and sequential handling
//! - PublishService: inbound requests onto publish queues

use thiserror::Error;

pub mod esb;
pub mod extract;
pub mod failure;
pub mod forwarder;
pub mod metrics;
pub mod publish;
pub mod registry;
pub mod tracker;

pub use esb::{EsbClient, EsbError, HttpEsbClient};
pub use extract::{consumer_request_id, tracking_id};
pub use failure::FailureRouter;
pub use forwarder::{build_http_client, ForwardRequest, ForwardTarget, MessageForwarder};
pub use publish::{PublishError, PublishService, SharedConfig};
pub use registry::{ConsumerRegistry, RegisterOutcome};
pub use tracker::{RequestDetails, RequestTracker};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Broker error: {0}")]
    Broker(#[from] qm_broker::BrokerError),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("ESB error: {0}")]
    Esb(#[from] EsbError),
}

pub type Result<T> = std::result::Result<T, RelayError>;
