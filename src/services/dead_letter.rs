use std::sync::Arc;

use tracing::info;

use crate::{
    clients::Store,
    error::AppError,
    models::{
        dead_letter::{DeadLetterEntry, DeadLetterStats, ReplaySummary},
        message::{NotificationMessage, OutboundMessage},
    },
    state::BrokerGate,
};

#[derive(Clone)]
pub struct DeadLetterService {
    store: Arc<dyn Store>,
    broker: Arc<BrokerGate>,
    max_retries: u32,
    batch_size: i64,
}

impl DeadLetterService {
    pub fn new(
        store: Arc<dyn Store>,
        broker: Arc<BrokerGate>,
        max_retries: u32,
        batch_size: i64,
    ) -> Self {
        Self {
            store,
            broker,
            max_retries,
            batch_size,
        }
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<DeadLetterEntry>, AppError> {
        Ok(self.store.list_dead_letters(limit, offset).await?)
    }

    pub async fn stats(&self) -> Result<DeadLetterStats, AppError> {
        Ok(self.store.dead_letter_stats().await?)
    }

    /// Requeues one entry with a fresh retry budget. The entry stays in the
    /// store, flagged as requeued; an entry that is already flagged is
    /// refused until the flag is reset outside the pipeline.
    pub async fn replay(&self, id: i64) -> Result<DeadLetterEntry, AppError> {
        let publisher = self.broker.publisher().ok_or(AppError::BrokerUnavailable)?;

        let entry = self
            .store
            .get_dead_letter(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Dead letter entry {} not found", id)))?;

        if entry.retry_attempted {
            return Err(AppError::Conflict(format!(
                "Dead letter entry {} was already requeued",
                id
            )));
        }

        let outbound = OutboundMessage::new(NotificationMessage::replay(&entry, self.max_retries));
        publisher
            .publish_batch(std::slice::from_ref(&outbound))
            .await?;
        self.store.mark_retry_attempted(&[entry.id]).await?;

        info!(
            dlq_id = entry.id,
            request_id = entry.request_id,
            "Dead letter entry requeued"
        );

        Ok(entry)
    }

    /// Requeues up to one batch of entries that were never requeued, oldest
    /// first.
    pub async fn replay_pending(&self) -> Result<ReplaySummary, AppError> {
        let publisher = self.broker.publisher().ok_or(AppError::BrokerUnavailable)?;

        let entries = self.store.pending_dead_letters(self.batch_size).await?;
        if entries.is_empty() {
            return Ok(ReplaySummary {
                count: 0,
                ids: Vec::new(),
            });
        }

        let batch: Vec<OutboundMessage> = entries
            .iter()
            .map(|entry| OutboundMessage::new(NotificationMessage::replay(entry, self.max_retries)))
            .collect();
        publisher.publish_batch(&batch).await?;

        let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        self.store.mark_retry_attempted(&ids).await?;

        info!(count = ids.len(), "Dead letter entries requeued");

        Ok(ReplaySummary {
            count: ids.len(),
            ids,
        })
    }

    pub async fn delete(&self, id: i64) -> Result<(), AppError> {
        if !self.store.delete_dead_letter(id).await? {
            return Err(AppError::NotFound(format!(
                "Dead letter entry {} not found",
                id
            )));
        }

        info!(dlq_id = id, "Dead letter entry deleted");
        Ok(())
    }
}
