use std::{future::Future, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use tokio::{sync::OnceCell, time::timeout};
use tracing::info;

use crate::{clients::Cache, config::Config};

/// Redis-backed [`Cache`]. The connection is established on first use so an
/// unreachable Redis never blocks startup; every call is bounded by the
/// configured timeout.
pub struct RedisClient {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    op_timeout: Duration,
}

impl RedisClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = Client::open(config.redis_url.as_str())
            .map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            op_timeout: config.cache_timeout(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, Error> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                let manager = timeout(self.op_timeout, ConnectionManager::new(self.client.clone()))
                    .await
                    .map_err(|_| anyhow!("Timed out connecting to redis"))?
                    .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

                info!("Redis connection established");
                Ok::<_, Error>(manager)
            })
            .await?;

        Ok(manager.clone())
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T, Error>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        timeout(self.op_timeout, fut)
            .await
            .map_err(|_| anyhow!("Redis {} timed out", operation))?
            .map_err(|e| anyhow!("Redis {} failed: {}", operation, e))
    }
}

#[async_trait]
impl Cache for RedisClient {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        self.bounded("GET", conn.get(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.connection().await?;
        self.bounded("SETEX", conn.set_ex::<_, _, ()>(key, value, ttl_seconds))
            .await
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection().await?;
        self.bounded("INCR", conn.incr(key, 1)).await
    }

    async fn expire(&self, key: &str, seconds: i64) -> Result<()> {
        let mut conn = self.connection().await?;
        self.bounded("EXPIRE", conn.expire::<_, ()>(key, seconds)).await
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection().await?;
        self.bounded("TTL", conn.ttl(key)).await
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection().await?;
        self.bounded("DEL", conn.del::<_, ()>(keys.to_vec())).await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        self.bounded("PING", conn.ping::<String>()).await?;

        Ok(())
    }
}
