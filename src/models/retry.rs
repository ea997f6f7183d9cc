use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl RetryConfig {
    /// Base delay before attempt `retry_count + 1`, capped at `max_delay_ms`.
    pub fn base_delay_ms(&self, retry_count: u32) -> u64 {
        let factor = self.backoff_multiplier.saturating_pow(retry_count);
        self.initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// `base_delay_ms` with ±10% jitter.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let base = self.base_delay_ms(retry_count);
        let jitter = rand::random_range(-0.1..=0.1);

        Duration::from_millis((base as f64 * (1.0 + jitter)) as u64)
    }
}
