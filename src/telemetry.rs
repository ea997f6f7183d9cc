use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{
    EnvFilter, Layer, layer::Context, layer::SubscriberExt, util::SubscriberInitExt,
};

const DEFAULT_FILTER: &str = "email_service=info,tower_http=info";
const SHIPPED_TARGET_PREFIX: &str = "email_service";
const SHIP_TIMEOUT: Duration = Duration::from_secs(2);

/// Installs the global subscriber: JSON lines on stdout, plus the log
/// shipper when a log server is configured.
pub fn init(service: &str, log_server_url: Option<&str>, buffer: usize) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let shipper = log_server_url.map(|url| LogShipperLayer::spawn(service, url, buffer));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json().with_target(true))
        .with(shipper)
        .init();
}

#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub service: String,
    pub level: &'static str,
    pub message: String,
    pub details: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Forwards INFO, WARN and ERROR events from this crate to the external log
/// server. Never blocks the caller: records are dropped when the buffer is
/// full or the server does not answer.
pub struct LogShipperLayer {
    service: String,
    sender: mpsc::Sender<LogRecord>,
}

impl LogShipperLayer {
    /// Must be called from within a tokio runtime.
    pub fn spawn(service: &str, log_server_url: &str, buffer: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let endpoint = format!("{}/api/log", log_server_url.trim_end_matches('/'));

        tokio::spawn(ship(receiver, endpoint));

        Self {
            service: service.to_string(),
            sender,
        }
    }
}

async fn ship(mut receiver: mpsc::Receiver<LogRecord>, endpoint: String) {
    let client = reqwest::Client::new();

    while let Some(record) = receiver.recv().await {
        let _ = client
            .post(&endpoint)
            .timeout(SHIP_TIMEOUT)
            .json(&record)
            .send()
            .await;
    }
}

fn level_name(level: &Level) -> Option<&'static str> {
    match *level {
        Level::ERROR => Some("error"),
        Level::WARN => Some("warning"),
        Level::INFO => Some("info"),
        _ => None,
    }
}

impl<S: Subscriber> Layer<S> for LogShipperLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();

        if !metadata.target().starts_with(SHIPPED_TARGET_PREFIX) {
            return;
        }
        let Some(level) = level_name(metadata.level()) else {
            return;
        };

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let record = LogRecord {
            service: self.service.clone(),
            level,
            message: visitor.message.unwrap_or_default(),
            details: visitor.details,
            timestamp: Utc::now(),
        };

        let _ = self.sender.try_send(record);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    details: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.details.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_info_and_above_have_a_wire_level() {
        assert_eq!(level_name(&Level::ERROR), Some("error"));
        assert_eq!(level_name(&Level::WARN), Some("warning"));
        assert_eq!(level_name(&Level::INFO), Some("info"));
        assert_eq!(level_name(&Level::DEBUG), None);
        assert_eq!(level_name(&Level::TRACE), None);
    }
}
