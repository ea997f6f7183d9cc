use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub broker_ready: bool,
    pub cache_connected: bool,
    pub database_connected: bool,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn new(broker_ready: bool, cache_connected: bool, database_connected: bool) -> Self {
        let status = if !database_connected {
            HealthStatus::Unhealthy
        } else if !broker_ready || !cache_connected {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };

        Self {
            status,
            broker_ready,
            cache_connected,
            database_connected,
            timestamp: Utc::now(),
        }
    }
}
