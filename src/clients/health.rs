use std::{sync::Arc, time::Instant};

use tracing::{debug, warn};

use crate::{
    clients::{Cache, Store},
    models::health::HealthReport,
    state::BrokerGate,
};

#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    broker: Arc<BrokerGate>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn Store>, cache: Arc<dyn Cache>, broker: Arc<BrokerGate>) -> Self {
        Self {
            store,
            cache,
            broker,
        }
    }

    pub async fn check_all(&self) -> HealthReport {
        let (database_connected, cache_connected) =
            tokio::join!(self.check_database(), self.check_cache());

        HealthReport::new(self.broker.is_ready(), cache_connected, database_connected)
    }

    async fn check_database(&self) -> bool {
        let start = Instant::now();

        match self.store.health_check().await {
            Ok(_) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Database health check passed");
                true
            }
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                false
            }
        }
    }

    async fn check_cache(&self) -> bool {
        let start = Instant::now();

        match self.cache.ping().await {
            Ok(_) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Redis health check passed");
                true
            }
            Err(e) => {
                warn!(error = %e, "Redis ping failed");
                false
            }
        }
    }
}
