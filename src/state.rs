use std::sync::{Arc, OnceLock};

use axum::extract::FromRef;

use crate::{
    clients::{Cache, Publisher, Store, health::HealthChecker},
    config::Config,
    services::{
        dead_letter::DeadLetterService, ingestion::IngestionService, rate_limiter::RateLimiter,
        template_cache::TemplateCache,
    },
};

/// Readiness gate for the broker producer. Starts closed and is opened once,
/// after the producer has connected and declared its queues.
#[derive(Default)]
pub struct BrokerGate {
    publisher: OnceLock<Arc<dyn Publisher>>,
}

impl BrokerGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the gate was already open.
    pub fn open(&self, publisher: Arc<dyn Publisher>) -> bool {
        self.publisher.set(publisher).is_ok()
    }

    pub fn is_ready(&self) -> bool {
        self.publisher.get().is_some()
    }

    pub fn publisher(&self) -> Option<Arc<dyn Publisher>> {
        self.publisher.get().cloned()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub broker: Arc<BrokerGate>,
    pub templates: TemplateCache,
    pub rate_limiter: RateLimiter,
    pub ingestion: IngestionService,
    pub dead_letters: DeadLetterService,
    pub health: HealthChecker,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        broker: Arc<BrokerGate>,
    ) -> Self {
        let templates = TemplateCache::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            config.template_cache_ttl_seconds,
        );
        let rate_limiter = RateLimiter::new(
            Arc::clone(&cache),
            config.rate_limit_max_requests,
            config.rate_limit_window_seconds,
        );
        let ingestion =
            IngestionService::new(Arc::clone(&store), Arc::clone(&broker), config.max_retries);
        let dead_letters = DeadLetterService::new(
            Arc::clone(&store),
            Arc::clone(&broker),
            config.max_retries,
            config.dlq_replay_batch_size,
        );
        let health = HealthChecker::new(Arc::clone(&store), cache, Arc::clone(&broker));

        Self {
            config: Arc::new(config),
            store,
            broker,
            templates,
            rate_limiter,
            ingestion,
            dead_letters,
            health,
        }
    }
}

impl FromRef<AppState> for HealthChecker {
    fn from_ref(state: &AppState) -> Self {
        state.health.clone()
    }
}

impl FromRef<AppState> for RateLimiter {
    fn from_ref(state: &AppState) -> Self {
        state.rate_limiter.clone()
    }
}
