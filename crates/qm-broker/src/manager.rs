//! BrokerConnectionManager - the process-wide broker channel
//!
//! One connection and one channel shared by every consumer and by the
//! dead-letter path. Constructed explicitly and injected, with an explicit
//! `init` / `close` lifecycle.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{BrokerChannel, BrokerConnector, BrokerError, Result};

/// A message fetched for inspection
#[derive(Debug, Clone, PartialEq)]
pub struct InspectedMessage {
    pub raw: String,
    /// Parsed body, when the raw text is valid JSON
    pub json: Option<serde_json::Value>,
}

impl InspectedMessage {
    pub fn from_bytes(body: &[u8]) -> Self {
        let raw = String::from_utf8_lossy(body).into_owned();
        let json = serde_json::from_str(&raw).ok();
        Self { raw, json }
    }
}

pub struct BrokerConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    channel: RwLock<Option<Arc<dyn BrokerChannel>>>,
}

impl BrokerConnectionManager {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            connector,
            channel: RwLock::new(None),
        }
    }

    /// Open the shared connection and channel. Must be called once; a second
    /// call without `close` in between is rejected.
    pub async fn init(&self, uri: &str) -> Result<()> {
        if self.is_initialized() {
            return Err(BrokerError::AlreadyInitialized);
        }

        let channel = self.connector.connect(uri).await?;

        let rejected = {
            let mut slot = self.channel.write();
            if slot.is_some() {
                Some(channel)
            } else {
                *slot = Some(channel);
                None
            }
        };

        if let Some(extra) = rejected {
            if let Err(e) = extra.close().await {
                warn!(error = %e, "Failed to close surplus broker connection");
            }
            return Err(BrokerError::AlreadyInitialized);
        }

        info!("Broker connection manager initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.channel.read().is_some()
    }

    /// The shared channel, or `NotInitialized` before `init`
    pub fn get_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        self.channel.read().clone().ok_or(BrokerError::NotInitialized)
    }

    /// Release channel then connection. Never fails; a missing channel is fine.
    pub async fn close(&self) {
        let channel = self.channel.write().take();

        match channel {
            Some(channel) => match channel.close().await {
                Ok(()) => info!("Broker connection closed"),
                Err(e) => warn!(error = %e, "Error while closing broker connection"),
            },
            None => debug!("Broker connection manager close called without an open channel"),
        }
    }

    /// Pop one message from a queue without acknowledgement, for inspection
    pub async fn get_one(&self, queue: &str) -> Result<Option<InspectedMessage>> {
        let channel = self.get_channel()?;
        channel.assert_queue(queue).await?;
        let body = channel.get_one(queue).await?;
        Ok(body.as_deref().map(InspectedMessage::from_bytes))
    }
}
