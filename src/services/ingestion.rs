use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    clients::Store,
    error::AppError,
    models::{
        message::OutboundMessage,
        request::{NewRequest, NotificationInput, Request},
    },
    state::BrokerGate,
};

#[derive(Clone)]
pub struct IngestionService {
    store: Arc<dyn Store>,
    broker: Arc<BrokerGate>,
    max_retries: u32,
}

impl IngestionService {
    pub fn new(store: Arc<dyn Store>, broker: Arc<BrokerGate>, max_retries: u32) -> Self {
        Self {
            store,
            broker,
            max_retries,
        }
    }

    /// Persists the valid entries as `pending` and hands them to the broker.
    ///
    /// Refuses everything while the producer is not ready, so no request is
    /// stored that could not have been published. A failed publish after the
    /// commit is not an error: the outbox rows stay behind for the relay.
    pub async fn submit(&self, entries: Vec<NotificationInput>) -> Result<Vec<Request>, AppError> {
        let publisher = self.broker.publisher().ok_or(AppError::BrokerUnavailable)?;

        let received = entries.len();
        let batch: Vec<NewRequest> = entries
            .into_iter()
            .filter_map(NotificationInput::into_new_request)
            .collect();

        if batch.len() < received {
            warn!(
                skipped = received - batch.len(),
                "Skipping notification entries without template_id or data"
            );
        }

        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let pending = self.store.create_requests(&batch, self.max_retries).await?;
        let outbound: Vec<OutboundMessage> = pending.iter().map(|p| p.outbound.clone()).collect();

        match publisher.publish_batch(&outbound).await {
            Ok(()) => {
                let ids: Vec<Uuid> = outbound.iter().map(|o| o.message_id).collect();
                if let Err(e) = self.store.clear_outbox(&ids).await {
                    warn!(error = %e, count = ids.len(), "Failed to clear outbox after publish");
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    count = outbound.len(),
                    "Broker publish failed, outbox relay will retry"
                );
            }
        }

        for p in &pending {
            info!(
                request_id = p.request.id,
                template_id = p.request.template_id,
                "Notification request queued"
            );
        }

        Ok(pending.into_iter().map(|p| p.request).collect())
    }
}
