//! Client-side request limiter for scorer calls.
//!
//! Each scorer owns its limiter, so throttling state travels with the client
//! instead of living in a process-wide timestamp. Requests are spread across a
//! one-minute sliding window, with an optional minimum gap between calls.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Configuration for scorer request limits.
#[derive(Debug, Clone, Default)]
pub struct RateLimitConfig {
    /// Requests per minute limit (0 = unlimited).
    pub rpm: usize,
    /// Minimum spacing between consecutive requests.
    pub min_interval: Duration,
}

impl RateLimitConfig {
    pub fn per_minute(rpm: usize) -> Self {
        Self {
            rpm,
            min_interval: Duration::ZERO,
        }
    }
}

/// A sliding-window limiter that tracks request timestamps.
#[derive(Debug)]
pub struct RequestLimiter {
    config: RateLimitConfig,
    /// Timestamps of recent requests within the window.
    requests_window: VecDeque<Instant>,
    last_request: Option<Instant>,
    window: Duration,
}

impl RequestLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            requests_window: VecDeque::new(),
            last_request: None,
            window: Duration::from_secs(60),
        }
    }

    /// Check if a request can proceed now.
    ///
    /// Returns `None` if the request can proceed immediately, or `Some(delay)`
    /// indicating how long to wait before retrying.
    pub fn check(&mut self) -> Option<Duration> {
        let now = Instant::now();
        self.prune(now);

        if !self.config.min_interval.is_zero() {
            if let Some(last) = self.last_request {
                let wait = self
                    .config
                    .min_interval
                    .saturating_sub(now.duration_since(last));
                if !wait.is_zero() {
                    return Some(wait);
                }
            }
        }

        if self.config.rpm > 0 && self.requests_window.len() >= self.config.rpm {
            if let Some(&oldest) = self.requests_window.front() {
                let wait = self.window.saturating_sub(now.duration_since(oldest));
                if !wait.is_zero() {
                    return Some(wait);
                }
            }
        }

        None
    }

    /// Record that a request was sent.
    pub fn record(&mut self) {
        let now = Instant::now();
        self.requests_window.push_back(now);
        self.last_request = Some(now);
    }

    pub fn has_limits(&self) -> bool {
        self.config.rpm > 0 || !self.config.min_interval.is_zero()
    }

    /// Requests counted in the current window.
    pub fn current_usage(&mut self) -> usize {
        self.prune(Instant::now());
        self.requests_window.len()
    }

    /// Remove entries older than the sliding window.
    fn prune(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while self.requests_window.front().is_some_and(|t| *t < cutoff) {
            self.requests_window.pop_front();
        }
    }
}
