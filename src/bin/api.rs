use std::sync::Arc;

use anyhow::{Error, Result};
use email_service::{
    api::run_api_server,
    clients::{Store, database::DatabaseClient, rbmq::RabbitMqClient, redis::RedisClient},
    config::Config,
    services::outbox::OutboxRelay,
    state::{AppState, BrokerGate},
    telemetry,
    utils::{shutdown_signal, wait_for_shutdown},
};
use tokio::sync::watch;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "email-service";

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

    let cache = Arc::new(RedisClient::new(&config)?);
    let broker = Arc::new(BrokerGate::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(true);
    });

    // The API serves (and answers 503 on ingestion) while the producer
    // connects. Running out of connect attempts stops the process.
    let connector = {
        let config = config.clone();
        let broker = Arc::clone(&broker);
        let shutdown_tx = shutdown_tx.clone();

        tokio::spawn(async move {
            match RabbitMqClient::connect_with_retry(&config).await {
                Ok(client) => {
                    let client = Arc::new(client);
                    broker.open(client.clone());
                    info!("Broker producer ready");
                    Ok(client)
                }
                Err(e) => {
                    error!(error = %e, "Broker producer could not connect, shutting down");
                    let _ = shutdown_tx.send(true);
                    Err(e)
                }
            }
        })
    };

    let relay = OutboxRelay::new(Arc::clone(&store), Arc::clone(&broker), &config);
    let relay = tokio::spawn(relay.run(shutdown_rx.clone()));

    let state = AppState::new(config, store, cache, broker);
    let mut result = run_api_server(state, wait_for_shutdown(shutdown_rx)).await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = relay.await {
        warn!(error = %e, "Outbox relay task failed");
    }

    if connector.is_finished() {
        match connector.await? {
            Ok(client) => {
                if let Err(e) = client.close().await {
                    warn!(error = %e, "Failed to close broker connection");
                }
            }
            Err(e) => result = result.and(Err(e)),
        }
    } else {
        connector.abort();
    }

    database.close().await;
    info!("Shutdown complete");

    result
}
