//! Presence-aware delivery: push to the live connection when there is one,
//! otherwise park the frame on the durable notification queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use courier_broker::{Broker, Envelope};
use courier_shared::constants::NOTIFICATION_QUEUE;
use courier_shared::protocol::ServerFrame;
use courier_shared::rpc::OfflineNotification;
use courier_shared::UserId;

use crate::registry::ConnectionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Queued,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EphemeralDelivery {
    Delivered,
    Skipped,
}

#[derive(Clone)]
pub struct Notifier {
    registry: ConnectionRegistry,
    broker: Arc<dyn Broker>,
    send_timeout: Duration,
}

impl Notifier {
    pub fn new(registry: ConnectionRegistry, broker: Arc<dyn Broker>, send_timeout: Duration) -> Self {
        Self {
            registry,
            broker,
            send_timeout,
        }
    }

    pub async fn notify(&self, user: UserId, frame: ServerFrame) -> Delivery {
        let frame = match self.try_live(user, frame).await {
            Ok(()) => return Delivery::Delivered,
            Err(frame) => frame,
        };

        match self.publish_offline(user, &frame).await {
            Ok(()) => {
                tracing::debug!(user = %user, frame = frame.frame_type(), "user offline, notification queued");
                Delivery::Queued
            }
            Err(e) => {
                tracing::warn!(user = %user, frame = frame.frame_type(), error = %e, "failed to queue offline notification");
                Delivery::Failed
            }
        }
    }

    /// Live delivery only. Used for frames that are meaningless once the
    /// user has gone away, such as upload progress.
    pub async fn notify_ephemeral(&self, user: UserId, frame: ServerFrame) -> EphemeralDelivery {
        match self.try_live(user, frame).await {
            Ok(()) => EphemeralDelivery::Delivered,
            Err(_) => EphemeralDelivery::Skipped,
        }
    }

    async fn try_live(&self, user: UserId, frame: ServerFrame) -> Result<(), ServerFrame> {
        let Some(conn) = self.registry.lookup(user) else {
            return Err(frame);
        };

        match conn.send(frame, self.send_timeout).await {
            Ok(()) => Ok(()),
            Err(frame) => {
                tracing::warn!(user = %user, connection = %conn.id, frame = frame.frame_type(), "live delivery failed, dropping connection");
                self.registry.remove_if_current(user, conn.id);
                conn.close();
                Err(frame)
            }
        }
    }

    /// Offline delivery for frames a connection accepted but never wrote.
    /// Connection-bound frames are dropped. Returns how many were queued.
    pub async fn requeue_undelivered(&self, user: UserId, frames: Vec<ServerFrame>) -> usize {
        let mut queued = 0;
        for frame in frames.into_iter().filter(|f| !f.is_connection_bound()) {
            match self.publish_offline(user, &frame).await {
                Ok(()) => queued += 1,
                Err(e) => {
                    tracing::warn!(user = %user, frame = frame.frame_type(), error = %e, "failed to queue undelivered frame");
                }
            }
        }
        if queued > 0 {
            tracing::info!(user = %user, queued, "undelivered frames moved to the notification queue");
        }
        queued
    }

    async fn publish_offline(&self, user: UserId, frame: &ServerFrame) -> anyhow::Result<()> {
        let notification = OfflineNotification {
            kind: frame.frame_type().to_string(),
            user_id: user,
            payload: serde_json::to_value(frame)?,
            queued_at: Utc::now(),
        };
        self.broker
            .publish(NOTIFICATION_QUEUE, Envelope::json(&notification)?)
            .await?;
        Ok(())
    }
}
