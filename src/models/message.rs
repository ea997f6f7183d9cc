use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{dead_letter::DeadLetterEntry, request::Request};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Broker payload. A snapshot of the request taken at publish time; the
/// same `request_id` may be published many times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub request_id: i64,
    pub user_name: String,
    pub user_email: String,
    pub template_id: i64,

    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_retry: Option<bool>,
}

impl NotificationMessage {
    pub fn for_request(request: &Request, max_retries: u32) -> Self {
        Self {
            request_id: request.id,
            user_name: request.user_name.clone(),
            user_email: request.user_email.clone(),
            template_id: request.template_id,
            data: request.data.clone(),
            timestamp: Utc::now(),
            retry_count: 0,
            max_retries,
            manual_retry: None,
        }
    }

    /// Fresh message for a manual dead-letter replay: the retry budget
    /// starts over.
    pub fn replay(entry: &DeadLetterEntry, max_retries: u32) -> Self {
        Self {
            request_id: entry.request_id,
            user_name: entry.user_name.clone(),
            user_email: entry.user_email.clone(),
            template_id: entry.template_id,
            data: entry.data.clone(),
            timestamp: Utc::now(),
            retry_count: 0,
            max_retries,
            manual_retry: Some(true),
        }
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            timestamp: Utc::now(),
            ..self.clone()
        }
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    pub fn key(&self) -> String {
        self.request_id.to_string()
    }
}

/// A message plus the broker-level identity it is published under.
/// Republishing the same `OutboundMessage` reuses `message_id`, which is what
/// the worker deduplicates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub message_id: Uuid,
    pub key: String,
    pub message: NotificationMessage,
}

impl OutboundMessage {
    pub fn new(message: NotificationMessage) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            key: message.key(),
            message,
        }
    }
}

/// Outbox row waiting for the relay.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub request_id: i64,
    pub message: NotificationMessage,
    pub created_at: DateTime<Utc>,
}

impl From<OutboxEntry> for OutboundMessage {
    fn from(entry: OutboxEntry) -> Self {
        Self {
            message_id: entry.id,
            key: entry.request_id.to_string(),
            message: entry.message,
        }
    }
}
