use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::clients::Cache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { limit: u64, remaining: u64 },
    Limited { limit: u64, retry_after: u64 },
}

/// Fixed-window counter per client, stored in the cache.
///
/// A crash between INCR and EXPIRE leaves a counter without expiry; that
/// client stays limited until the key is removed by hand.
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn Cache>,
    limit: u64,
    window_seconds: u64,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn Cache>, limit: u64, window_seconds: u64) -> Self {
        Self {
            cache,
            limit,
            window_seconds,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Counts one call for `client`. Fails open when the cache is
    /// unreachable.
    pub async fn check(&self, client: &str) -> RateDecision {
        let key = format!("ratelimit:{}", client);

        match self.count(&key).await {
            Ok((count, ttl)) => {
                let decision = decide(count, self.limit, ttl, self.window_seconds);
                if let RateDecision::Limited { retry_after, .. } = decision {
                    debug!(client, count, retry_after, "Rate limit exceeded");
                }
                decision
            }
            Err(e) => {
                warn!(client, error = %e, "Rate limiter cache unavailable, allowing request");
                RateDecision::Allowed {
                    limit: self.limit,
                    remaining: self.limit,
                }
            }
        }
    }

    async fn count(&self, key: &str) -> Result<(u64, i64)> {
        let count = self.cache.incr(key).await?;

        if count == 1 {
            self.cache.expire(key, self.window_seconds as i64).await?;
        }

        let count = count.max(0) as u64;
        if count <= self.limit {
            return Ok((count, -1));
        }

        let ttl = self.cache.ttl(key).await.unwrap_or(-1);
        Ok((count, ttl))
    }
}

fn decide(count: u64, limit: u64, ttl: i64, window_seconds: u64) -> RateDecision {
    if count > limit {
        let retry_after = if ttl > 0 { ttl as u64 } else { window_seconds };
        RateDecision::Limited { limit, retry_after }
    } else {
        RateDecision::Allowed {
            limit,
            remaining: limit - count,
        }
    }
}
