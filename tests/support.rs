use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use email_service::{
    clients::{Cache, EmailGateway, OutgoingEmail, Publisher, Store},
    config::Config,
    models::{
        audit::NewNotificationLog,
        dead_letter::{DeadLetterEntry, DeadLetterStats, NewDeadLetter},
        message::{NotificationMessage, OutboundMessage, OutboxEntry},
        request::{NewRequest, PendingPublish, Request, RequestWithTemplate},
        status::RequestStatus,
        template::{Template, TemplateInput},
    },
    services::worker::{DeliveryWorker, WorkerSettings},
    state::{AppState, BrokerGate},
};
use uuid::Uuid;

pub fn test_config() -> Config {
    test_config_with(&[])
}

pub fn test_config_with(overrides: &[(&str, &str)]) -> Config {
    let mut vars = vec![
        ("DATABASE_URL".to_string(), "postgres://localhost/test".to_string()),
        ("RABBITMQ_URL".to_string(), "amqp://localhost:5672".to_string()),
        ("OUTBOX_GRACE_SECONDS".to_string(), "0".to_string()),
    ];
    vars.extend(overrides.iter().map(|(k, v)| (k.to_string(), v.to_string())));

    Config::from_iter(vars).expect("test config")
}

pub fn worker_settings() -> WorkerSettings {
    let mut settings = WorkerSettings::from_config(&test_config());
    settings.smtp_timeout = Duration::from_millis(200);
    settings.write_retry.initial_delay_ms = 1;
    settings.write_retry.max_delay_ms = 5;
    settings
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct StoreState {
    pub templates: Vec<Template>,
    pub requests: Vec<Request>,
    pub logs: Vec<NewNotificationLog>,
    pub outbox: Vec<OutboxEntry>,
    pub dead_letters: Vec<DeadLetterEntry>,
    next_id: i64,
}

impl StoreState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory `Store`.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
    offline: AtomicBool,
    pub template_reads: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(anyhow!("connection refused"))
        } else {
            Ok(())
        }
    }

    pub fn add_template(&self, name: &str, subject: &str, html_content: &str) -> Template {
        let mut state = locked(&self.state);
        let now = Utc::now();
        let template = Template {
            id: state.next_id(),
            name: name.to_string(),
            description: None,
            subject: subject.to_string(),
            html_content: html_content.to_string(),
            variables: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        state.templates.push(template.clone());
        template
    }

    pub fn add_dead_letter(&self, request_id: i64, error_message: &str) -> DeadLetterEntry {
        let mut state = locked(&self.state);
        let entry = DeadLetterEntry {
            id: state.next_id(),
            request_id,
            user_name: "Ada".to_string(),
            user_email: "ada@example.com".to_string(),
            template_id: 1,
            data: HashMap::new(),
            error_message: error_message.to_string(),
            retry_count: 3,
            retry_attempted: false,
            failed_at: Utc::now(),
        };
        state.dead_letters.push(entry.clone());
        entry
    }

    pub fn requests(&self) -> Vec<Request> {
        locked(&self.state).requests.clone()
    }

    pub fn request(&self, id: i64) -> Option<Request> {
        locked(&self.state)
            .requests
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn logs(&self) -> Vec<NewNotificationLog> {
        locked(&self.state).logs.clone()
    }

    pub fn outbox(&self) -> Vec<OutboxEntry> {
        locked(&self.state).outbox.clone()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        locked(&self.state).dead_letters.clone()
    }

    fn set_status(&self, request_id: i64, status: RequestStatus) -> Result<()> {
        self.check()?;
        let mut state = locked(&self.state);
        if let Some(request) = state.requests.iter_mut().find(|r| r.id == request_id) {
            request.status = status;
            if status == RequestStatus::Sent {
                request.processed_at = Some(Utc::now());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn health_check(&self) -> Result<()> {
        self.check()
    }

    async fn list_templates(&self) -> Result<Vec<Template>> {
        self.check()?;
        self.template_reads.fetch_add(1, Ordering::SeqCst);
        Ok(locked(&self.state).templates.clone())
    }

    async fn get_template(&self, id: i64) -> Result<Option<Template>> {
        self.check()?;
        self.template_reads.fetch_add(1, Ordering::SeqCst);
        Ok(locked(&self.state)
            .templates
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn create_template(&self, input: &TemplateInput) -> Result<Template> {
        self.check()?;
        let mut template = self.add_template(&input.name, &input.subject, &input.html_content);
        template.description = input.description.clone();
        template.variables = input.variables.clone();

        let mut state = locked(&self.state);
        if let Some(stored) = state.templates.iter_mut().find(|t| t.id == template.id) {
            *stored = template.clone();
        }
        Ok(template)
    }

    async fn update_template(&self, id: i64, input: &TemplateInput) -> Result<Option<Template>> {
        self.check()?;
        let mut state = locked(&self.state);
        Ok(state.templates.iter_mut().find(|t| t.id == id).map(|t| {
            t.name = input.name.clone();
            t.description = input.description.clone();
            t.subject = input.subject.clone();
            t.html_content = input.html_content.clone();
            t.variables = input.variables.clone();
            t.updated_at = Utc::now();
            t.clone()
        }))
    }

    async fn delete_template(&self, id: i64) -> Result<bool> {
        self.check()?;
        let mut state = locked(&self.state);
        let before = state.templates.len();
        state.templates.retain(|t| t.id != id);
        Ok(state.templates.len() < before)
    }

    async fn create_requests(
        &self,
        batch: &[NewRequest],
        max_retries: u32,
    ) -> Result<Vec<PendingPublish>> {
        self.check()?;
        let mut state = locked(&self.state);
        let mut created = Vec::with_capacity(batch.len());

        for new in batch {
            let request = Request {
                id: state.next_id(),
                user_name: new.user_name.clone(),
                user_email: new.user_email.clone(),
                template_id: new.template_id,
                data: new.data.clone(),
                status: RequestStatus::Pending,
                created_at: Utc::now(),
                processed_at: None,
            };
            let outbound =
                OutboundMessage::new(NotificationMessage::for_request(&request, max_retries));

            state.requests.push(request.clone());
            state.outbox.push(OutboxEntry {
                id: outbound.message_id,
                request_id: request.id,
                message: outbound.message.clone(),
                created_at: Utc::now(),
            });
            created.push(PendingPublish { request, outbound });
        }

        Ok(created)
    }

    async fn list_requests(&self, limit: i64, offset: i64) -> Result<Vec<RequestWithTemplate>> {
        self.check()?;
        let state = locked(&self.state);
        let mut requests = state.requests.clone();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(requests
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|request| {
                let template_name = state
                    .templates
                    .iter()
                    .find(|t| t.id == request.template_id)
                    .map(|t| t.name.clone());
                RequestWithTemplate {
                    request,
                    template_name,
                }
            })
            .collect())
    }

    async fn mark_sent(&self, request_id: i64) -> Result<()> {
        self.set_status(request_id, RequestStatus::Sent)
    }

    async fn mark_failed(&self, request_id: i64) -> Result<()> {
        self.set_status(request_id, RequestStatus::Failed)
    }

    async fn append_log(&self, log: &NewNotificationLog) -> Result<()> {
        self.check()?;
        locked(&self.state).logs.push(log.clone());
        Ok(())
    }

    async fn claim_stale_outbox(
        &self,
        limit: i64,
        older_than: Duration,
    ) -> Result<Vec<OutboxEntry>> {
        self.check()?;
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than)?;
        Ok(locked(&self.state)
            .outbox
            .iter()
            .filter(|e| e.created_at <= cutoff)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn clear_outbox(&self, ids: &[Uuid]) -> Result<()> {
        self.check()?;
        locked(&self.state).outbox.retain(|e| !ids.contains(&e.id));
        Ok(())
    }

    async fn insert_dead_letter(&self, entry: &NewDeadLetter) -> Result<DeadLetterEntry> {
        self.check()?;
        let mut state = locked(&self.state);
        let stored = DeadLetterEntry {
            id: state.next_id(),
            request_id: entry.request_id,
            user_name: entry.user_name.clone(),
            user_email: entry.user_email.clone(),
            template_id: entry.template_id,
            data: entry.data.clone(),
            error_message: entry.error_message.clone(),
            retry_count: entry.retry_count,
            retry_attempted: false,
            failed_at: Utc::now(),
        };
        state.dead_letters.push(stored.clone());
        Ok(stored)
    }

    async fn list_dead_letters(&self, limit: i64, offset: i64) -> Result<Vec<DeadLetterEntry>> {
        self.check()?;
        let mut entries = self.dead_letters();
        entries.sort_by(|a, b| b.failed_at.cmp(&a.failed_at).then(b.id.cmp(&a.id)));
        Ok(entries
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn dead_letter_stats(&self) -> Result<DeadLetterStats> {
        self.check()?;
        let entries = self.dead_letters();
        let pending: Vec<&DeadLetterEntry> = entries.iter().filter(|e| !e.retry_attempted).collect();

        Ok(DeadLetterStats {
            total: entries.len() as i64,
            pending: pending.len() as i64,
            retried: (entries.len() - pending.len()) as i64,
            oldest_pending_at: pending.iter().map(|e| e.failed_at).min(),
        })
    }

    async fn get_dead_letter(&self, id: i64) -> Result<Option<DeadLetterEntry>> {
        self.check()?;
        Ok(self.dead_letters().into_iter().find(|e| e.id == id))
    }

    async fn pending_dead_letters(&self, limit: i64) -> Result<Vec<DeadLetterEntry>> {
        self.check()?;
        let mut entries: Vec<DeadLetterEntry> = self
            .dead_letters()
            .into_iter()
            .filter(|e| !e.retry_attempted)
            .collect();
        entries.sort_by(|a, b| a.failed_at.cmp(&b.failed_at).then(a.id.cmp(&b.id)));
        entries.truncate(limit as usize);
        Ok(entries)
    }

    async fn mark_retry_attempted(&self, ids: &[i64]) -> Result<()> {
        self.check()?;
        let mut state = locked(&self.state);
        for entry in state.dead_letters.iter_mut().filter(|e| ids.contains(&e.id)) {
            entry.retry_attempted = true;
        }
        Ok(())
    }

    async fn delete_dead_letter(&self, id: i64) -> Result<bool> {
        self.check()?;
        let mut state = locked(&self.state);
        let before = state.dead_letters.len();
        state.dead_letters.retain(|e| e.id != id);
        Ok(state.dead_letters.len() < before)
    }
}

/// In-memory `Cache` with a clock that tests can move forward.
#[derive(Default)]
pub struct FakeCache {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
    skew: Mutex<Duration>,
    offline: AtomicBool,
}

impl FakeCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        *locked(&self.skew) += by;
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = self.now();
        locked(&self.entries)
            .get(key)
            .is_some_and(|(_, expiry)| expiry.is_none_or(|at| at > now))
    }

    fn now(&self) -> Instant {
        Instant::now() + *locked(&self.skew)
    }

    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(anyhow!("Redis get timed out"))
        } else {
            Ok(())
        }
    }

    fn live(&self, key: &str) -> Option<(String, Option<Instant>)> {
        let now = self.now();
        let mut entries = locked(&self.entries);
        match entries.get(key) {
            Some((_, Some(at))) if *at <= now => {
                entries.remove(key);
                None
            }
            other => other.cloned(),
        }
    }
}

#[async_trait]
impl Cache for FakeCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.live(key).map(|(value, _)| value))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        self.check()?;
        let expiry = self.now() + Duration::from_secs(ttl_seconds);
        locked(&self.entries).insert(key.to_string(), (value.to_string(), Some(expiry)));
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.check()?;
        let (value, expiry) = self.live(key).unwrap_or(("0".to_string(), None));
        let next = value.parse::<i64>()? + 1;
        locked(&self.entries).insert(key.to_string(), (next.to_string(), expiry));
        Ok(next)
    }

    async fn expire(&self, key: &str, seconds: i64) -> Result<()> {
        self.check()?;
        let expiry = self.now() + Duration::from_secs(seconds.max(0) as u64);
        if let Some(entry) = locked(&self.entries).get_mut(key) {
            entry.1 = Some(expiry);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        self.check()?;
        let now = self.now();
        Ok(match self.live(key) {
            None => -2,
            Some((_, None)) => -1,
            Some((_, Some(at))) => at.saturating_duration_since(now).as_secs_f64().ceil() as i64,
        })
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        self.check()?;
        let mut entries = locked(&self.entries);
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

/// Records everything published instead of talking to a broker.
#[derive(Default)]
pub struct FakePublisher {
    published: Mutex<Vec<OutboundMessage>>,
    delayed: Mutex<Vec<(OutboundMessage, Duration)>>,
    failing: AtomicBool,
    failing_delayed: AtomicBool,
}

impl FakePublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_delayed(&self, failing: bool) {
        self.failing_delayed.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        locked(&self.published).clone()
    }

    pub fn delayed(&self) -> Vec<(OutboundMessage, Duration)> {
        locked(&self.delayed).clone()
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish_batch(&self, batch: &[OutboundMessage]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("Failed to publish message: connection reset"));
        }
        locked(&self.published).extend(batch.iter().cloned());
        Ok(())
    }

    async fn publish_delayed(&self, message: &OutboundMessage, delay: Duration) -> Result<()> {
        if self.failing_delayed.load(Ordering::SeqCst) {
            return Err(anyhow!("Failed to publish message: channel closed"));
        }
        locked(&self.delayed).push((message.clone(), delay));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    Accept,
    Reject,
    Hang,
}

pub struct FakeGateway {
    sent: Mutex<Vec<OutgoingEmail>>,
    mode: Mutex<GatewayMode>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            mode: Mutex::new(GatewayMode::Accept),
        })
    }

    pub fn set_mode(&self, mode: GatewayMode) {
        *locked(&self.mode) = mode;
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        locked(&self.sent).clone()
    }
}

#[async_trait]
impl EmailGateway for FakeGateway {
    async fn send(&self, email: &OutgoingEmail) -> Result<String> {
        let mode = *locked(&self.mode);
        match mode {
            GatewayMode::Accept => {
                let count = {
                    let mut sent = locked(&self.sent);
                    sent.push(email.clone());
                    sent.len()
                };
                Ok(format!("<{}@test.local>", count))
            }
            GatewayMode::Reject => Err(anyhow!("550 mailbox unavailable")),
            GatewayMode::Hang => {
                std::future::pending::<()>().await;
                Err(anyhow!("unreachable"))
            }
        }
    }
}

/// Every fake wired together the way the binaries wire the real clients.
pub struct Harness {
    pub store: Arc<FakeStore>,
    pub cache: Arc<FakeCache>,
    pub publisher: Arc<FakePublisher>,
    pub gateway: Arc<FakeGateway>,
    pub broker: Arc<BrokerGate>,
}

impl Harness {
    /// Broker gate already open.
    pub fn new() -> Self {
        let harness = Self::with_closed_gate();
        harness.broker.open(harness.publisher.clone());
        harness
    }

    pub fn with_closed_gate() -> Self {
        Self {
            store: FakeStore::new(),
            cache: FakeCache::new(),
            publisher: FakePublisher::new(),
            gateway: FakeGateway::new(),
            broker: Arc::new(BrokerGate::new()),
        }
    }

    pub fn app_state(&self) -> AppState {
        self.app_state_with(test_config())
    }

    pub fn app_state_with(&self, config: Config) -> AppState {
        AppState::new(
            config,
            self.store.clone(),
            self.cache.clone(),
            self.broker.clone(),
        )
    }

    pub fn worker(&self) -> DeliveryWorker {
        DeliveryWorker::new(
            self.store.clone(),
            self.gateway.clone(),
            self.publisher.clone(),
            self.cache.clone(),
            worker_settings(),
        )
    }
}

pub fn payload(message: &NotificationMessage) -> Vec<u8> {
    serde_json::to_vec(message).expect("encode message")
}
