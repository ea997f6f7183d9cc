use std::sync::Arc;

use anyhow::{Error, Result};
use email_service::{
    api::run_health_server,
    clients::{
        Cache, Store, database::DatabaseClient, health::HealthChecker, rbmq::RabbitMqClient,
        redis::RedisClient, smtp::SmtpClient,
    },
    config::Config,
    services::worker::{DeliveryWorker, WorkerSettings},
    state::BrokerGate,
    telemetry,
    utils::{shutdown_signal, wait_for_shutdown},
};
use tokio::sync::watch;
use tracing::{info, warn};

const SERVICE_NAME: &str = "email-worker";

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = Config::load()?;
    telemetry::init(
        SERVICE_NAME,
        config.log_server_url.as_deref(),
        config.log_buffer_size,
    );

    let database = Arc::new(DatabaseClient::connect(&config).await?);
    if config.run_migrations {
        database.migrate().await?;
    }
    let store: Arc<dyn Store> = database.clone();
    let cache: Arc<dyn Cache> = Arc::new(RedisClient::new(&config)?);

    let smtp = SmtpClient::new(&config)?;
    smtp.verify().await;

    let rabbit = Arc::new(RabbitMqClient::connect_with_retry(&config).await?);
    let broker = Arc::new(BrokerGate::new());
    broker.open(rabbit.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(true);
    });

    let checker = HealthChecker::new(Arc::clone(&store), Arc::clone(&cache), broker);
    let health = tokio::spawn(run_health_server(
        checker,
        config.worker_health_port,
        wait_for_shutdown(shutdown_rx.clone()),
    ));

    let worker = Arc::new(DeliveryWorker::new(
        store,
        Arc::new(smtp),
        rabbit.clone(),
        cache,
        WorkerSettings::from_config(&config),
    ));

    let result = worker
        .run(
            Arc::clone(&rabbit),
            config.worker_concurrency,
            wait_for_shutdown(shutdown_rx),
        )
        .await;

    let _ = shutdown_tx.send(true);
    match health.await {
        Ok(Err(e)) => warn!(error = %e, "Health server failed"),
        Err(e) => warn!(error = %e, "Health server task failed"),
        Ok(Ok(())) => {}
    }

    if let Err(e) = rabbit.close().await {
        warn!(error = %e, "Failed to close broker connection");
    }
    database.close().await;
    info!("Shutdown complete");

    result
}
