//! Inter-chunk pacing to stay within the scorer's external rate limits.

use crate::config::BatchConfig;
use async_trait::async_trait;
use std::time::Duration;

/// A "sleep for a while" capability.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Computes the courtesy delay after each chunk.
///
/// The delay grows with the number of records just scored and is multiplied
/// by the backoff factor after a chunk that errored, up to `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPacer {
    pub per_record: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl ChunkPacer {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            per_record: Duration::from_millis(config.delay_per_record_ms),
            backoff_factor: config.error_backoff_factor.max(1.0),
            max_delay: Duration::from_secs(config.max_delay_secs),
        }
    }

    pub fn delay_for(&self, chunk_len: usize, had_error: bool) -> Duration {
        let base = self.per_record.saturating_mul(chunk_len as u32);
        let delay = if had_error {
            Duration::try_from_secs_f64(base.as_secs_f64() * self.backoff_factor)
                .unwrap_or(self.max_delay)
        } else {
            base
        };
        delay.min(self.max_delay)
    }
}
