//! Background fan-out queue for notifications that should not hold up the
//! reader loop (upload progress).

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use courier_shared::protocol::ServerFrame;
use courier_shared::UserId;

use crate::notifier::{Delivery, EphemeralDelivery, Notifier};

#[derive(Debug)]
pub struct NotificationJob {
    pub user_id: UserId,
    pub frame: ServerFrame,
    /// Live delivery only, no offline fallback.
    pub ephemeral: bool,
}

#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<NotificationJob>,
}

impl NotificationQueue {
    /// Start the worker task. It exits once every queue handle is dropped.
    pub fn spawn(notifier: Notifier, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(run(notifier, rx));
        (Self { tx }, handle)
    }

    /// Enqueue without waiting. A full queue drops the job.
    pub fn enqueue(&self, job: NotificationJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(user = %job.user_id, frame = job.frame.frame_type(), "notification queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!(user = %job.user_id, frame = job.frame.frame_type(), "notification worker stopped");
                false
            }
        }
    }
}

async fn run(notifier: Notifier, mut jobs: mpsc::Receiver<NotificationJob>) {
    while let Some(job) = jobs.recv().await {
        let frame_type = job.frame.frame_type();

        if job.ephemeral {
            if notifier.notify_ephemeral(job.user_id, job.frame).await == EphemeralDelivery::Skipped {
                tracing::debug!(user = %job.user_id, frame = frame_type, "user offline, skipping notification");
            }
        } else if notifier.notify(job.user_id, job.frame).await == Delivery::Failed {
            tracing::warn!(user = %job.user_id, frame = frame_type, "notification job failed");
        }
    }

    tracing::debug!("notification worker exiting");
}
