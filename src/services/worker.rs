use std::{future::Future, sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinSet, time::timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clients::{Cache, EmailGateway, OutgoingEmail, Publisher, Store, rbmq::RabbitMqClient},
    config::Config,
    models::{
        audit::NewNotificationLog,
        dead_letter::NewDeadLetter,
        message::{NotificationMessage, OutboundMessage},
        retry::RetryConfig,
    },
    utils::{render_template, retry_with_backoff, template_variables},
};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub smtp_timeout: Duration,
    pub retry: RetryConfig,
    pub write_retry: RetryConfig,
    pub idempotency_ttl_seconds: u64,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            smtp_timeout: config.smtp_timeout(),
            retry: config.retry_config(),
            write_retry: config.write_retry_config(),
            idempotency_ttl_seconds: config.idempotency_ttl_seconds,
        }
    }
}

/// What happened to one consumed message. Every outcome ends with the
/// message being acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    RetryScheduled,
    DeadLettered,
    /// Already handled under the same broker message id.
    Duplicate,
    /// Payload could not be decoded.
    Dropped,
}

#[derive(Debug, Error)]
pub enum DeliveryFailure {
    #[error("Template not found: no template with ID {0}")]
    TemplateNotFound(i64),

    #[error("Template lookup failed: {0}")]
    TemplateLookup(String),

    #[error("Email delivery failed: {0}")]
    Gateway(String),

    #[error("Email delivery timed out after {0:?}")]
    Timeout(Duration),
}

fn processed_key(message_id: &str) -> String {
    format!("processed:{}", message_id)
}

pub struct DeliveryWorker {
    store: Arc<dyn Store>,
    gateway: Arc<dyn EmailGateway>,
    publisher: Arc<dyn Publisher>,
    cache: Arc<dyn Cache>,
    settings: WorkerSettings,
}

impl DeliveryWorker {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn EmailGateway>,
        publisher: Arc<dyn Publisher>,
        cache: Arc<dyn Cache>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            publisher,
            cache,
            settings,
        }
    }

    /// Runs one message through render, send and bookkeeping.
    pub async fn handle(&self, payload: &[u8], message_id: Option<&str>) -> DeliveryOutcome {
        let message = match serde_json::from_slice::<NotificationMessage>(payload) {
            Ok(message) => message,
            Err(e) => {
                error!(
                    error = %e,
                    payload = %String::from_utf8_lossy(payload),
                    "Dropping malformed message"
                );
                return DeliveryOutcome::Dropped;
            }
        };

        if let Some(id) = message_id
            && self.already_processed(id).await
        {
            info!(
                message_id = id,
                request_id = message.request_id,
                "Skipping duplicate delivery"
            );
            return DeliveryOutcome::Duplicate;
        }

        info!(
            request_id = message.request_id,
            template_id = message.template_id,
            retry_count = message.retry_count,
            manual_retry = message.manual_retry.unwrap_or(false),
            "Processing notification"
        );

        let outcome = match self.deliver(&message).await {
            Ok(delivery_id) => {
                self.record_success(&message, &delivery_id).await;
                DeliveryOutcome::Sent
            }
            Err(failure) => self.record_failure(&message, &failure).await,
        };

        if let Some(id) = message_id {
            self.mark_processed(id).await;
        }

        outcome
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<String, DeliveryFailure> {
        let template = self
            .store
            .get_template(message.template_id)
            .await
            .map_err(|e| DeliveryFailure::TemplateLookup(e.to_string()))?
            .ok_or(DeliveryFailure::TemplateNotFound(message.template_id))?;

        let variables = template_variables(&message.user_name, &message.user_email, &message.data);
        let rendered = render_template(&template, &variables);

        debug!(
            request_id = message.request_id,
            template_name = %template.name,
            recipient = %message.user_email,
            "Template rendered"
        );

        let email = OutgoingEmail {
            to: message.user_email.clone(),
            subject: rendered.subject,
            html: rendered.html,
        };

        match timeout(self.settings.smtp_timeout, self.gateway.send(&email)).await {
            Ok(Ok(delivery_id)) => Ok(delivery_id),
            Ok(Err(e)) => Err(DeliveryFailure::Gateway(e.to_string())),
            Err(_) => Err(DeliveryFailure::Timeout(self.settings.smtp_timeout)),
        }
    }

    async fn record_success(&self, message: &NotificationMessage, delivery_id: &str) {
        let request_id = message.request_id;

        if let Err(e) = retry_with_backoff(&self.settings.write_retry, || {
            self.store.mark_sent(request_id)
        })
        .await
        {
            error!(request_id, error = %e, "Failed to mark request as sent");
        }

        let log = NewNotificationLog::success(request_id);
        if let Err(e) =
            retry_with_backoff(&self.settings.write_retry, || self.store.append_log(&log)).await
        {
            error!(request_id, error = %e, "Failed to write success log");
        }

        info!(request_id, delivery_id, "Email sent successfully");
    }

    async fn record_failure(
        &self,
        message: &NotificationMessage,
        failure: &DeliveryFailure,
    ) -> DeliveryOutcome {
        let request_id = message.request_id;
        let error_text = failure.to_string();

        error!(
            request_id,
            retry_count = message.retry_count,
            error = %error_text,
            "Error processing notification"
        );

        if let Err(e) = retry_with_backoff(&self.settings.write_retry, || {
            self.store.mark_failed(request_id)
        })
        .await
        {
            error!(request_id, error = %e, "Failed to mark request as failed");
        }

        let log = NewNotificationLog::failed(request_id).with_error(error_text.clone());
        if let Err(e) =
            retry_with_backoff(&self.settings.write_retry, || self.store.append_log(&log)).await
        {
            error!(request_id, error = %e, "Failed to write failure log");
        }

        if message.retries_exhausted() {
            warn!(
                request_id,
                retry_count = message.retry_count,
                max_retries = message.max_retries,
                "Max retries reached, moving to dead-letter store"
            );
            self.dead_letter(message, error_text).await;
            return DeliveryOutcome::DeadLettered;
        }

        let next = OutboundMessage::new(message.next_attempt());
        let delay = self.settings.retry.delay_for(message.retry_count);

        match self.publisher.publish_delayed(&next, delay).await {
            Ok(()) => {
                info!(
                    request_id,
                    retry_count = next.message.retry_count,
                    max_retries = next.message.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retry scheduled"
                );
                DeliveryOutcome::RetryScheduled
            }
            Err(e) => {
                error!(
                    request_id,
                    error = %e,
                    "Failed to schedule retry, moving to dead-letter store"
                );
                self.dead_letter(message, error_text).await;
                DeliveryOutcome::DeadLettered
            }
        }
    }

    async fn dead_letter(&self, message: &NotificationMessage, error_text: String) {
        let entry = NewDeadLetter::from_message(message, error_text);

        match retry_with_backoff(&self.settings.write_retry, || {
            self.store.insert_dead_letter(&entry)
        })
        .await
        {
            Ok(stored) => info!(
                request_id = message.request_id,
                dlq_id = stored.id,
                "Message moved to dead-letter store"
            ),
            Err(e) => error!(
                request_id = message.request_id,
                error = %e,
                "Failed to write dead-letter entry"
            ),
        }
    }

    async fn already_processed(&self, message_id: &str) -> bool {
        match self.cache.get(&processed_key(message_id)).await {
            Ok(marker) => marker.is_some(),
            Err(e) => {
                warn!(message_id, error = %e, "Idempotency check failed, processing anyway");
                false
            }
        }
    }

    async fn mark_processed(&self, message_id: &str) {
        if let Err(e) = self
            .cache
            .set_ex(
                &processed_key(message_id),
                "1",
                self.settings.idempotency_ttl_seconds,
            )
            .await
        {
            warn!(message_id, error = %e, "Failed to record processed message");
        }
    }

    /// Consumes the request queue until `shutdown` resolves, running at most
    /// `concurrency` messages at a time. In-flight messages are finished
    /// before returning.
    pub async fn run<S>(
        self: Arc<Self>,
        rabbit: Arc<RabbitMqClient>,
        concurrency: usize,
        shutdown: S,
    ) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let consumer_tag = format!("email-worker-{}", Uuid::new_v4());
        let mut consumer = rabbit.create_consumer(&consumer_tag).await?;

        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut in_flight = JoinSet::new();
        let mut result = Ok(());

        tokio::pin!(shutdown);

        info!(concurrency = concurrency.max(1), "Worker consuming");

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        result = Err(anyhow!("Worker semaphore closed: {}", e));
                        break;
                    }
                },
            };

            let delivery = tokio::select! {
                _ = &mut shutdown => break,
                next = consumer.next() => next,
            };

            let delivery = match delivery {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    result = Err(anyhow!("Consumer stream failed: {}", e));
                    break;
                }
                None => {
                    warn!("Consumer stream ended");
                    break;
                }
            };

            let worker = Arc::clone(&self);
            let rabbit = Arc::clone(&rabbit);

            in_flight.spawn(async move {
                let message_id = delivery
                    .properties
                    .message_id()
                    .as_ref()
                    .map(|id| id.as_str().to_string());

                let outcome = worker.handle(&delivery.data, message_id.as_deref()).await;
                debug!(?outcome, "Message handled");

                if let Err(e) = rabbit.acknowledge(delivery.delivery_tag).await {
                    error!(error = %e, "Failed to acknowledge message");
                }

                drop(permit);
            });

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Delivery task panicked");
                }
            }
        }

        info!("Stopping consumer");
        if let Err(e) = rabbit.cancel_consumer(&consumer_tag).await {
            warn!(error = %e, "Failed to cancel consumer");
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Delivery task panicked");
            }
        }

        info!("In-flight messages finished");
        result
    }
}
