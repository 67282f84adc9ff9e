//! In-process [`Broker`] used when no AMQP URL is configured, and in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::broker::{Broker, Envelope};
use crate::error::BrokerError;

const QUEUE_CAPACITY: usize = 1024;

struct Queue {
    tx: mpsc::Sender<Envelope>,
    /// Taken by the first consumer.
    rx: Option<mpsc::Receiver<Envelope>>,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        Self { tx, rx: Some(rx) }
    }
}

#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, Queue>>,
    unreachable: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail as if the broker were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), BrokerError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BrokerError::Unreachable("in-memory broker is offline".into()));
        }
        Ok(())
    }

    fn sender(&self, queue: &str) -> mpsc::Sender<Envelope> {
        let mut queues = self.queues.lock().unwrap_or_else(|p| p.into_inner());
        queues
            .entry(queue.to_string())
            .or_insert_with(Queue::new)
            .tx
            .clone()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_queue(&self, name: &str, _durable: bool) -> Result<(), BrokerError> {
        self.check_reachable()?;
        let mut queues = self.queues.lock().unwrap_or_else(|p| p.into_inner());
        queues.entry(name.to_string()).or_insert_with(Queue::new);
        Ok(())
    }

    async fn publish(&self, queue: &str, envelope: Envelope) -> Result<(), BrokerError> {
        self.check_reachable()?;
        // Never waits; a full queue counts as unreachable.
        self.sender(queue).try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                BrokerError::Unreachable(format!("queue {queue} is full"))
            }
            mpsc::error::TrySendError::Closed(_) => BrokerError::Closed(queue.to_string()),
        })
    }

    async fn consume(&self, queue: &str) -> Result<mpsc::Receiver<Envelope>, BrokerError> {
        self.check_reachable()?;
        let mut queues = self.queues.lock().unwrap_or_else(|p| p.into_inner());
        queues
            .entry(queue.to_string())
            .or_insert_with(Queue::new)
            .rx
            .take()
            .ok_or_else(|| BrokerError::AlreadyConsumed(queue.to_string()))
    }
}
