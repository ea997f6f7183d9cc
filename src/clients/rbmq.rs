use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    publisher_confirm::PublisherConfirm,
    types::{AMQPValue, FieldTable},
};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::{
    clients::Publisher,
    config::Config,
    models::{message::OutboundMessage, retry::RetryConfig},
    utils::retry_with_backoff,
};

pub const MESSAGE_KEY_HEADER: &str = "x-message-key";

pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
    request_queue_name: String,
    retry_queue_name: String,
    max_in_flight: usize,
    in_flight: Arc<Semaphore>,
    publish_retry: RetryConfig,
}

impl RabbitMqClient {
    /// Connects, enables publisher confirms and makes sure both queues exist.
    /// The client is only handed out once all of that succeeded.
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to enable publisher confirms: {}", e))?;

        channel
            .queue_declare(
                config.request_queue_name.as_str(),
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare request queue: {}", e))?;

        let mut retry_arguments = FieldTable::default();
        retry_arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString("".into()),
        );
        retry_arguments.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(config.request_queue_name.clone().into()),
        );

        channel
            .queue_declare(
                config.retry_queue_name.as_str(),
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                retry_arguments,
            )
            .await
            .map_err(|e| anyhow!("Failed to declare retry queue: {}", e))?;

        info!(
            request_queue = %config.request_queue_name,
            retry_queue = %config.retry_queue_name,
            "RabbitMQ topology declared"
        );

        let max_in_flight = config.publish_max_in_flight.max(1);

        Ok(Self {
            connection,
            channel,
            request_queue_name: config.request_queue_name.clone(),
            retry_queue_name: config.retry_queue_name.clone(),
            max_in_flight,
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
            publish_retry: config.write_retry_config(),
        })
    }

    /// `connect` retried with exponential backoff.
    pub async fn connect_with_retry(config: &Config) -> Result<Self, Error> {
        retry_with_backoff(&config.broker_connect_retry_config(), || {
            Self::connect(config)
        })
        .await
    }

    pub async fn create_consumer(&self, consumer_tag: &str) -> Result<Consumer, Error> {
        let consumer = self
            .channel
            .basic_consume(
                self.request_queue_name.as_str(),
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

        info!(queue = %self.request_queue_name, consumer_tag, "Consumer created");

        Ok(consumer)
    }

    pub async fn cancel_consumer(&self, consumer_tag: &str) -> Result<(), Error> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to cancel consumer: {}", e))?;

        Ok(())
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))?;

        Ok(())
    }

    pub async fn close(&self) -> Result<(), Error> {
        self.channel
            .close(200, "shutdown")
            .await
            .map_err(|e| anyhow!("Failed to close channel: {}", e))?;
        self.connection
            .close(200, "shutdown")
            .await
            .map_err(|e| anyhow!("Failed to close connection: {}", e))?;

        info!("RabbitMQ connection closed");
        Ok(())
    }

    fn properties(outbound: &OutboundMessage, delay: Option<Duration>) -> BasicProperties {
        let mut headers = FieldTable::default();
        headers.insert(
            MESSAGE_KEY_HEADER.into(),
            AMQPValue::LongString(outbound.key.clone().into()),
        );

        let properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type("application/json".into())
            .with_message_id(outbound.message_id.to_string().into())
            .with_correlation_id(outbound.key.clone().into())
            .with_timestamp(Utc::now().timestamp() as u64)
            .with_headers(headers);

        // Expiry only fires at the head of the retry queue, so a short delay
        // can wait behind a longer one.
        match delay {
            Some(delay) => properties.with_expiration(delay.as_millis().to_string().into()),
            None => properties,
        }
    }

    async fn publish_one(
        &self,
        queue: &str,
        outbound: &OutboundMessage,
        delay: Option<Duration>,
    ) -> Result<PublisherConfirm, Error> {
        let payload = serde_json::to_vec(&outbound.message)?;

        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &payload,
                Self::properties(outbound, delay),
            )
            .await
            .map_err(|e| anyhow!("Failed to publish message: {}", e))
    }

    /// Publishes one chunk and waits for every broker confirm. At most
    /// `max_in_flight` publishes are unconfirmed at any time across callers.
    async fn publish_chunk(
        &self,
        queue: &str,
        chunk: &[OutboundMessage],
        delay: Option<Duration>,
    ) -> Result<(), Error> {
        let _permits = self
            .in_flight
            .acquire_many(chunk.len() as u32)
            .await
            .map_err(|e| anyhow!("Publisher is shutting down: {}", e))?;

        let mut confirms = Vec::with_capacity(chunk.len());
        for outbound in chunk {
            confirms.push(self.publish_one(queue, outbound, delay).await?);
        }

        for (outbound, confirm) in chunk.iter().zip(confirms) {
            let confirmation = confirm
                .await
                .map_err(|e| anyhow!("Publisher confirm failed: {}", e))?;

            if confirmation.is_nack() {
                return Err(anyhow!(
                    "Broker rejected message {} for request {}",
                    outbound.message_id,
                    outbound.key
                ));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Publisher for RabbitMqClient {
    async fn publish_batch(&self, batch: &[OutboundMessage]) -> Result<()> {
        for chunk in batch.chunks(self.max_in_flight) {
            retry_with_backoff(&self.publish_retry, || {
                self.publish_chunk(&self.request_queue_name, chunk, None)
            })
            .await?;
        }

        debug!(count = batch.len(), "Batch published");
        Ok(())
    }

    async fn publish_delayed(&self, message: &OutboundMessage, delay: Duration) -> Result<()> {
        retry_with_backoff(&self.publish_retry, || {
            self.publish_chunk(
                &self.retry_queue_name,
                std::slice::from_ref(message),
                Some(delay),
            )
        })
        .await?;

        debug!(
            message_id = %message.message_id,
            delay_ms = delay.as_millis() as u64,
            "Message scheduled for redelivery"
        );
        Ok(())
    }
}
