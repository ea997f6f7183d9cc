use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::message::NotificationMessage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: i64,
    pub request_id: i64,
    pub user_name: String,
    pub user_email: String,
    pub template_id: i64,
    pub data: HashMap<String, serde_json::Value>,
    pub error_message: String,
    pub retry_count: i32,
    /// One-shot "has been manually requeued" marker. Not a success flag.
    pub retry_attempted: bool,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDeadLetter {
    pub request_id: i64,
    pub user_name: String,
    pub user_email: String,
    pub template_id: i64,
    pub data: HashMap<String, serde_json::Value>,
    pub error_message: String,
    pub retry_count: i32,
}

impl NewDeadLetter {
    pub fn from_message(message: &NotificationMessage, error_message: String) -> Self {
        Self {
            request_id: message.request_id,
            user_name: message.user_name.clone(),
            user_email: message.user_email.clone(),
            template_id: message.template_id,
            data: message.data.clone(),
            error_message,
            retry_count: i32::try_from(message.retry_count).unwrap_or(i32::MAX),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterStats {
    pub total: i64,
    pub pending: i64,
    pub retried: i64,
    pub oldest_pending_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub count: usize,
    pub ids: Vec<i64>,
}
