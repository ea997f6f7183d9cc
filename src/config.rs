use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::retry::RetryConfig;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Implicit TLS, usually port 465.
    Tls,
    StartTls,
    None,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_seconds")]
    pub db_acquire_timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub run_migrations: bool,

    pub rabbitmq_url: String,
    #[serde(default = "default_request_queue_name")]
    pub request_queue_name: String,
    #[serde(default = "default_retry_queue_name")]
    pub retry_queue_name: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    #[serde(default = "default_publish_max_in_flight")]
    pub publish_max_in_flight: usize,
    #[serde(default = "default_broker_connect_attempts")]
    pub broker_connect_attempts: u32,
    #[serde(default = "default_broker_connect_delay_ms")]
    pub broker_connect_delay_ms: u64,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_cache_timeout_ms")]
    pub cache_timeout_ms: u64,
    #[serde(default = "default_template_cache_ttl_seconds")]
    pub template_cache_ttl_seconds: u64,
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u64,
    #[serde(default = "default_rate_limit_window_seconds")]
    pub rate_limit_window_seconds: u64,
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,

    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default = "default_smtp_security")]
    pub smtp_security: SmtpSecurity,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub smtp_from: Option<String>,
    #[serde(default = "default_smtp_from_name")]
    pub smtp_from_name: String,
    #[serde(default = "default_smtp_timeout_seconds")]
    pub smtp_timeout_seconds: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_outbox_poll_interval_seconds")]
    pub outbox_poll_interval_seconds: u64,
    #[serde(default = "default_outbox_grace_seconds")]
    pub outbox_grace_seconds: u64,
    #[serde(default = "default_outbox_batch_size")]
    pub outbox_batch_size: i64,

    #[serde(default = "default_dlq_replay_batch_size")]
    pub dlq_replay_batch_size: i64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_worker_health_port")]
    pub worker_health_port: u16,

    pub log_server_url: Option<String>,
    #[serde(default = "default_log_buffer_size")]
    pub log_buffer_size: usize,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        Self::from_iter(std::env::vars())
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Self>(vars)
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))
    }

    /// Backoff for redelivering failed messages through the retry queue.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    /// Backoff for in-process retries of store writes.
    pub fn write_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2,
        }
    }

    pub fn broker_connect_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.broker_connect_attempts,
            initial_delay_ms: self.broker_connect_delay_ms,
            max_delay_ms: 30_000,
            backoff_multiplier: 2,
        }
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }

    pub fn smtp_timeout(&self) -> Duration {
        Duration::from_secs(self.smtp_timeout_seconds)
    }

    pub fn from_address(&self) -> String {
        let address = self
            .smtp_from
            .clone()
            .or_else(|| self.smtp_user.clone())
            .unwrap_or_else(|| "notifications@localhost".to_string());

        format!("{} <{}>", self.smtp_from_name, address)
    }
}

fn default_true() -> bool {
    true
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_seconds() -> u64 {
    5
}

fn default_request_queue_name() -> String {
    "notification-requests".to_string()
}

fn default_retry_queue_name() -> String {
    "notification-requests.retry".to_string()
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_publish_max_in_flight() -> usize {
    5
}

fn default_broker_connect_attempts() -> u32 {
    10
}

fn default_broker_connect_delay_ms() -> u64 {
    300
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_cache_timeout_ms() -> u64 {
    500
}

fn default_template_cache_ttl_seconds() -> u64 {
    300
}

fn default_rate_limit_max_requests() -> u64 {
    100
}

fn default_rate_limit_window_seconds() -> u64 {
    60
}

fn default_idempotency_ttl_seconds() -> u64 {
    86_400
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    465
}

fn default_smtp_security() -> SmtpSecurity {
    SmtpSecurity::Tls
}

fn default_smtp_from_name() -> String {
    "Notification System".to_string()
}

fn default_smtp_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    60_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_worker_concurrency() -> usize {
    1
}

fn default_outbox_poll_interval_seconds() -> u64 {
    5
}

fn default_outbox_grace_seconds() -> u64 {
    10
}

fn default_outbox_batch_size() -> i64 {
    100
}

fn default_dlq_replay_batch_size() -> i64 {
    50
}

fn default_server_port() -> u16 {
    3001
}

fn default_worker_health_port() -> u16 {
    3002
}

fn default_log_buffer_size() -> usize {
    1024
}
