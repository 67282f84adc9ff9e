use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::BrokerError;

/// One message as it travels through a queue.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    pub body: Vec<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
}

impl Envelope {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            ..Default::default()
        }
    }

    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_vec(value).map(Self::new)
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Minimal queue broker surface used by the services.
///
/// Publishing goes to the default exchange, so the routing key is the queue
/// name. A queue is consumed by at most one receiver per process.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn declare_queue(&self, name: &str, durable: bool) -> Result<(), BrokerError>;

    async fn publish(&self, queue: &str, envelope: Envelope) -> Result<(), BrokerError>;

    /// Start consuming `queue`. Deliveries are acknowledged once they have
    /// been handed to the returned receiver.
    async fn consume(&self, queue: &str) -> Result<mpsc::Receiver<Envelope>, BrokerError>;
}
