use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{message::OutboundMessage, status::RequestStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: i64,
    pub user_name: String,
    pub user_email: String,
    pub template_id: i64,
    pub data: HashMap<String, serde_json::Value>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Request row joined with the name of its template, if it still exists.
#[derive(Debug, Clone, Serialize)]
pub struct RequestWithTemplate {
    #[serde(flatten)]
    pub request: Request,
    pub template_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRequest {
    pub user_name: String,
    pub user_email: String,
    pub template_id: i64,
    pub data: HashMap<String, serde_json::Value>,
}

/// One entry of a `POST /notifications` body. Every field is optional at the
/// parsing stage so that incomplete entries can be skipped instead of
/// failing the whole batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationInput {
    #[serde(default)]
    pub user_name: Option<String>,

    #[serde(default)]
    pub user_email: Option<String>,

    #[serde(default)]
    pub template_id: Option<i64>,

    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl NotificationInput {
    /// Entries that do not decode become empty inputs, which
    /// `into_new_request` then skips.
    pub fn lenient(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    /// `None` when `template_id` or an object-valued `data` is missing.
    pub fn into_new_request(self) -> Option<NewRequest> {
        let template_id = self.template_id?;
        let data = match self.data? {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => return None,
        };

        Some(NewRequest {
            user_name: self.user_name.unwrap_or_default(),
            user_email: self.user_email.unwrap_or_default(),
            template_id,
            data,
        })
    }
}

/// Body of `POST /notifications`: a single object or an array. Remembers
/// which one it got so the response can mirror it.
#[derive(Debug, Clone)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn is_single(&self) -> bool {
        matches!(self, OneOrMany::One(_))
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

impl OneOrMany<NotificationInput> {
    /// Each entry is decoded on its own, so one badly typed entry does not
    /// take the rest of the batch down with it.
    pub fn from_body(body: serde_json::Value) -> Self {
        match body {
            serde_json::Value::Array(items) => {
                OneOrMany::Many(items.into_iter().map(NotificationInput::lenient).collect())
            }
            other => OneOrMany::One(NotificationInput::lenient(other)),
        }
    }
}

/// A persisted request together with the outbox message written in the
/// same transaction.
#[derive(Debug, Clone)]
pub struct PendingPublish {
    pub request: Request,
    pub outbound: OutboundMessage,
}
