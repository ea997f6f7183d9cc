use serde::Serialize;

use crate::models::status::LogStatus;

/// One row for the append-only processing log.
#[derive(Debug, Clone, Serialize)]
pub struct NewNotificationLog {
    pub request_id: i64,
    pub status: LogStatus,
    pub error_message: Option<String>,
}

impl NewNotificationLog {
    pub fn success(request_id: i64) -> Self {
        Self {
            request_id,
            status: LogStatus::Success,
            error_message: None,
        }
    }

    pub fn failed(request_id: i64) -> Self {
        Self {
            request_id,
            status: LogStatus::Failed,
            error_message: None,
        }
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error_message = Some(error);
        self
    }
}
