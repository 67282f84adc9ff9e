//! RabbitMQ-backed [`Broker`] built on `lapin`.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::broker::{Broker, Envelope};
use crate::error::BrokerError;

/// Deliveries buffered between a consumer channel and its receiver.
const CONSUMER_BUFFER: usize = 256;

/// Unacknowledged deliveries the server may push to one consumer.
const PREFETCH: u16 = 32;

pub struct AmqpBroker {
    connection: Connection,
    /// Shared by every publisher; lapin channels are internally synchronised.
    publisher: Channel,
}

impl AmqpBroker {
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Unreachable(e.to_string()))?;
        let publisher = connection.create_channel().await?;

        tracing::info!("connected to AMQP broker");

        Ok(Self {
            connection,
            publisher,
        })
    }

    pub async fn close(&self) -> Result<(), BrokerError> {
        self.connection.close(200, "shutdown").await?;
        Ok(())
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_queue(&self, name: &str, durable: bool) -> Result<(), BrokerError> {
        self.publisher
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        tracing::debug!(queue = name, durable, "queue declared");
        Ok(())
    }

    async fn publish(&self, queue: &str, envelope: Envelope) -> Result<(), BrokerError> {
        let mut properties =
            BasicProperties::default().with_content_type(ShortString::from("application/json"));
        if let Some(id) = envelope.correlation_id {
            properties = properties.with_correlation_id(ShortString::from(id));
        }
        if let Some(reply_to) = envelope.reply_to {
            properties = properties.with_reply_to(ShortString::from(reply_to));
        }

        self.publisher
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &envelope.body,
                properties,
            )
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<mpsc::Receiver<Envelope>, BrokerError> {
        let channel = self.connection.create_channel().await?;
        channel
            .basic_qos(PREFETCH, BasicQosOptions::default())
            .await?;

        let tag = format!("courier-{}", Uuid::new_v4());
        let mut consumer = channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let (tx, rx) = mpsc::channel(CONSUMER_BUFFER);
        let queue = queue.to_string();

        tokio::spawn(async move {
            // The channel must outlive the consumer stream.
            let _channel = channel;

            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!(queue = %queue, error = %e, "consumer stream failed");
                        break;
                    }
                };

                let envelope = Envelope {
                    body: delivery.data.clone(),
                    correlation_id: delivery
                        .properties
                        .correlation_id()
                        .as_ref()
                        .map(|s| s.as_str().to_string()),
                    reply_to: delivery
                        .properties
                        .reply_to()
                        .as_ref()
                        .map(|s| s.as_str().to_string()),
                };

                if tx.send(envelope).await.is_err() {
                    tracing::debug!(queue = %queue, "receiver dropped, stopping consumer");
                    break;
                }

                if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
                    tracing::warn!(queue = %queue, error = %e, "failed to ack delivery");
                }
            }

            tracing::info!(queue = %queue, consumer_tag = %tag, "consumer stopped");
        });

        Ok(rx)
    }
}
