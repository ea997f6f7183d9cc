use axum::{
    Json, Router,
    extract::{FromRef, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use crate::{clients::health::HealthChecker, models::health::HealthStatus};

pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    HealthChecker: FromRef<S>,
{
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(checker): State<HealthChecker>) -> impl IntoResponse {
    let health = checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Ok | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}
