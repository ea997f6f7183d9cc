//! Infrastructure clients and the traits the pipeline talks to them through.
//!
//! Services only depend on the traits, so the delivery state machine, the
//! ingestion path and dead-letter replay can be driven without Postgres,
//! Redis, RabbitMQ or an SMTP server.

pub mod database;
pub mod health;
pub mod rbmq;
pub mod redis;
pub mod smtp;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    audit::NewNotificationLog,
    dead_letter::{DeadLetterEntry, DeadLetterStats, NewDeadLetter},
    message::{OutboundMessage, OutboxEntry},
    request::{NewRequest, PendingPublish, RequestWithTemplate},
    template::{Template, TemplateInput},
};

/// Authoritative relational store.
#[async_trait]
pub trait Store: Send + Sync {
    async fn health_check(&self) -> Result<()>;

    async fn list_templates(&self) -> Result<Vec<Template>>;
    async fn get_template(&self, id: i64) -> Result<Option<Template>>;
    async fn create_template(&self, input: &TemplateInput) -> Result<Template>;
    async fn update_template(&self, id: i64, input: &TemplateInput) -> Result<Option<Template>>;
    async fn delete_template(&self, id: i64) -> Result<bool>;

    /// Inserts every request as `pending` together with its outbox row in a
    /// single transaction.
    async fn create_requests(
        &self,
        batch: &[NewRequest],
        max_retries: u32,
    ) -> Result<Vec<PendingPublish>>;
    async fn list_requests(&self, limit: i64, offset: i64) -> Result<Vec<RequestWithTemplate>>;
    async fn mark_sent(&self, request_id: i64) -> Result<()>;
    async fn mark_failed(&self, request_id: i64) -> Result<()>;
    async fn append_log(&self, log: &NewNotificationLog) -> Result<()>;

    /// Claims outbox rows older than `older_than` that nobody claimed
    /// recently.
    async fn claim_stale_outbox(&self, limit: i64, older_than: Duration)
    -> Result<Vec<OutboxEntry>>;
    async fn clear_outbox(&self, ids: &[Uuid]) -> Result<()>;

    async fn insert_dead_letter(&self, entry: &NewDeadLetter) -> Result<DeadLetterEntry>;
    async fn list_dead_letters(&self, limit: i64, offset: i64) -> Result<Vec<DeadLetterEntry>>;
    async fn dead_letter_stats(&self) -> Result<DeadLetterStats>;
    async fn get_dead_letter(&self, id: i64) -> Result<Option<DeadLetterEntry>>;
    /// Entries not yet requeued, oldest `failed_at` first.
    async fn pending_dead_letters(&self, limit: i64) -> Result<Vec<DeadLetterEntry>>;
    async fn mark_retry_attempted(&self, ids: &[i64]) -> Result<()>;
    async fn delete_dead_letter(&self, id: i64) -> Result<bool>;
}

/// Key/value cache with the handful of atomic operations the API needs.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;
    async fn incr(&self, key: &str) -> Result<i64>;
    async fn expire(&self, key: &str, seconds: i64) -> Result<()>;
    /// Remaining time to live in seconds; negative when the key has no
    /// expiry or does not exist.
    async fn ttl(&self, key: &str) -> Result<i64>;
    async fn del(&self, keys: &[String]) -> Result<()>;
    async fn ping(&self) -> Result<()>;
}

/// Producer side of the broker.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes the whole batch to the request queue, keyed by request id.
    async fn publish_batch(&self, batch: &[OutboundMessage]) -> Result<()>;

    /// Publishes to the retry queue; the broker hands the message back to the
    /// request queue once `delay` has elapsed.
    async fn publish_delayed(&self, message: &OutboundMessage, delay: Duration) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Email delivery gateway. Returns the delivery identifier on success.
#[async_trait]
pub trait EmailGateway: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<String>;
}
