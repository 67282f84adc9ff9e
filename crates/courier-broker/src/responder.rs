//! Server side of the correlation protocol.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::broker::{Broker, Envelope};
use crate::error::BrokerError;

/// Answer every request on `request_queue` with `handler`.
///
/// Replies go to the request's `reply_to` when present, otherwise to
/// `default_reply_queue`, and always carry the request's correlation id.
/// Undecodable requests are logged and skipped. Returns when the queue closes.
pub async fn serve<Req, Resp, F, Fut>(
    broker: Arc<dyn Broker>,
    request_queue: &str,
    default_reply_queue: &str,
    handler: F,
) -> Result<(), BrokerError>
where
    Req: DeserializeOwned + Send,
    Resp: Serialize + Send,
    F: Fn(Req) -> Fut + Send + Sync,
    Fut: Future<Output = Resp> + Send,
{
    broker.declare_queue(request_queue, false).await?;
    broker.declare_queue(default_reply_queue, false).await?;
    let mut requests = broker.consume(request_queue).await?;

    tracing::info!(queue = request_queue, "responder listening");

    while let Some(request) = requests.recv().await {
        let payload: Req = match request.decode() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(queue = request_queue, error = %e, "skipping malformed request");
                continue;
            }
        };

        let response = handler(payload).await;

        let mut reply = match Envelope::json(&response) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(queue = request_queue, error = %e, "failed to encode reply");
                continue;
            }
        };
        reply.correlation_id = request.correlation_id.clone();

        let target = request.reply_to.as_deref().unwrap_or(default_reply_queue);
        if let Err(e) = broker.publish(target, reply).await {
            tracing::warn!(
                queue = request_queue,
                reply_queue = target,
                correlation_id = ?request.correlation_id,
                error = %e,
                "failed to publish reply"
            );
        }
    }

    tracing::info!(queue = request_queue, "responder stopped");
    Ok(())
}
