use std::{future::Future, net::SocketAddr};

use anyhow::{Error, Result};
use axum::{Router, middleware};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{clients::health::HealthChecker, state::AppState};

pub mod dlq;
pub mod extract;
pub mod health;
pub mod notifications;
pub mod rate_limit;
pub mod requests;
pub mod templates;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(templates::router())
        .merge(notifications::router())
        .merge(requests::router())
        .merge(dlq::router())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce,
        ));

    Router::new()
        .merge(health::router())
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_api_server<F>(state: AppState, shutdown: F) -> Result<(), Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("0.0.0.0:{}", state.config.server_port);
    let app = router(state);

    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "API server started");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    info!("API server stopped");
    Ok(())
}

/// Health-only server for processes without the resource API.
pub async fn run_health_server<F>(checker: HealthChecker, port: u16, shutdown: F) -> Result<(), Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = health::router()
        .layer(TraceLayer::new_for_http())
        .with_state(checker);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Health check server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        let default = Pagination::default();
        assert_eq!(default.limit(), 50);
        assert_eq!(default.offset(), 0);

        let wild = Pagination {
            limit: Some(10_000),
            offset: Some(-5),
        };
        assert_eq!(wild.limit(), 200);
        assert_eq!(wild.offset(), 0);

        let zero = Pagination {
            limit: Some(0),
            offset: None,
        };
        assert_eq!(zero.limit(), 1);
    }
}
