use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    sync::watch,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{clients::Store, config::Config, models::message::OutboundMessage, state::BrokerGate};

/// Republishes outbox rows whose inline publish never completed.
pub struct OutboxRelay {
    store: Arc<dyn Store>,
    broker: Arc<BrokerGate>,
    batch_size: i64,
    grace: Duration,
    poll_interval: Duration,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn Store>, broker: Arc<BrokerGate>, config: &Config) -> Self {
        Self {
            store,
            broker,
            batch_size: config.outbox_batch_size,
            grace: Duration::from_secs(config.outbox_grace_seconds),
            poll_interval: Duration::from_secs(config.outbox_poll_interval_seconds.max(1)),
        }
    }

    /// One relay pass. Returns how many messages were republished.
    pub async fn relay_once(&self) -> Result<usize> {
        let Some(publisher) = self.broker.publisher() else {
            debug!("Broker not ready, skipping outbox pass");
            return Ok(0);
        };

        let entries = self
            .store
            .claim_stale_outbox(self.batch_size, self.grace)
            .await?;

        if entries.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = entries.iter().map(|e| e.id).collect();
        let batch: Vec<OutboundMessage> = entries.into_iter().map(OutboundMessage::from).collect();

        publisher.publish_batch(&batch).await?;
        self.store.clear_outbox(&ids).await?;

        info!(count = batch.len(), "Outbox messages relayed");
        Ok(batch.len())
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Outbox relay started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.relay_once().await {
                        warn!(error = %e, "Outbox relay pass failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Outbox relay stopped");
    }
}
