//! Synchronous request/response on top of the broker.
//!
//! Each [`RpcClient`] owns one reply queue and one dispatcher task. A call
//! registers a pending entry under a fresh correlation id, publishes the
//! request with `reply_to` set to the client's queue, then waits (bounded) for
//! the dispatcher to hand over the matching reply.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broker::{Broker, Envelope};
use crate::error::{BrokerError, RpcError};

struct PendingCall {
    request_queue: String,
    slot: oneshot::Sender<Envelope>,
    issued_at: Instant,
}

type PendingTable = Arc<Mutex<HashMap<String, PendingCall>>>;

fn lock(table: &PendingTable) -> MutexGuard<'_, HashMap<String, PendingCall>> {
    table.lock().unwrap_or_else(|p| p.into_inner())
}

/// Removes the pending entry when the call finishes or its future is dropped.
struct PendingGuard {
    table: PendingTable,
    correlation_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.table).remove(&self.correlation_id);
    }
}

pub struct RpcClient {
    broker: Arc<dyn Broker>,
    reply_queue: String,
    pending: PendingTable,
    timeout: Duration,
    dispatcher: JoinHandle<()>,
}

impl RpcClient {
    /// Declare `reply_queue`, start consuming it and return a ready client.
    pub async fn start(
        broker: Arc<dyn Broker>,
        reply_queue: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RpcError> {
        let reply_queue = reply_queue.into();
        broker.declare_queue(&reply_queue, false).await?;
        let replies = broker.consume(&reply_queue).await?;

        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let dispatcher = tokio::spawn(dispatch(replies, Arc::clone(&pending), reply_queue.clone()));

        tracing::info!(reply_queue = %reply_queue, timeout_ms = timeout.as_millis() as u64, "rpc client started");

        Ok(Self {
            broker,
            reply_queue,
            pending,
            timeout,
            dispatcher,
        })
    }

    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Publish `request` on `request_queue` and wait for the correlated reply.
    pub async fn call<Req, Resp>(&self, request_queue: &str, request: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request).map_err(|e| RpcError::Malformed(e.to_string()))?;
        let correlation_id = Uuid::new_v4().to_string();
        let (slot, reply) = oneshot::channel();

        lock(&self.pending).insert(
            correlation_id.clone(),
            PendingCall {
                request_queue: request_queue.to_string(),
                slot,
                issued_at: Instant::now(),
            },
        );
        let _guard = PendingGuard {
            table: Arc::clone(&self.pending),
            correlation_id: correlation_id.clone(),
        };

        let envelope = Envelope::new(body)
            .with_correlation_id(correlation_id.clone())
            .with_reply_to(self.reply_queue.clone());
        self.broker.publish(request_queue, envelope).await?;

        let reply = match tokio::time::timeout(self.timeout, reply).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(RpcError::Unreachable(BrokerError::Closed(
                    self.reply_queue.clone(),
                )))
            }
            Err(_) => {
                tracing::warn!(
                    queue = request_queue,
                    correlation_id = %correlation_id,
                    "rpc call timed out"
                );
                return Err(RpcError::Timeout(self.timeout));
            }
        };

        serde_json::from_slice(&reply.body).map_err(|e| {
            tracing::warn!(queue = request_queue, correlation_id = %correlation_id, error = %e, "undecodable rpc reply");
            RpcError::Malformed(e.to_string())
        })
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Drop pending entries older than `max_age`. Returns how many were removed.
    pub fn purge_expired(&self, max_age: Duration) -> usize {
        let mut table = lock(&self.pending);
        let before = table.len();
        table.retain(|id, call| {
            let keep = call.issued_at.elapsed() <= max_age;
            if !keep {
                tracing::debug!(correlation_id = %id, queue = %call.request_queue, "expiring pending call");
            }
            keep
        });
        before - table.len()
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch(mut replies: mpsc::Receiver<Envelope>, pending: PendingTable, reply_queue: String) {
    while let Some(reply) = replies.recv().await {
        let Some(correlation_id) = reply.correlation_id.clone() else {
            tracing::warn!(queue = %reply_queue, "discarding reply without correlation id");
            continue;
        };

        let call = lock(&pending).remove(&correlation_id);
        match call {
            Some(call) => {
                if call.slot.send(reply).is_err() {
                    tracing::debug!(correlation_id = %correlation_id, "caller gave up before reply arrived");
                }
            }
            None => {
                tracing::warn!(
                    queue = %reply_queue,
                    correlation_id = %correlation_id,
                    "discarding reply with unknown correlation id"
                );
            }
        }
    }

    tracing::warn!(queue = %reply_queue, "reply queue closed, dispatcher exiting");
}
