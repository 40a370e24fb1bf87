//! Retry decision and exponential backoff.
use std::time::Duration;

use rand::Rng;

use crate::{config::GatewayConfig, ports::transport::TransportErrorKind};

/// Upstream statuses worth another attempt.
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per logical request, the original included.
    max_attempts: u32,
    base_delay: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter: false,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_base_delay()).with_jitter(config.retry_jitter)
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether the failure of attempt `attempt` (1-based) should be followed by another.
    ///
    /// `status` is the upstream status when a response arrived, `error_kind` the
    /// transport failure otherwise.
    pub fn should_retry(
        &self,
        attempt: u32,
        status: Option<u16>,
        error_kind: Option<TransportErrorKind>,
    ) -> bool {
        attempt < self.max_attempts && Self::is_retryable(status, error_kind)
    }

    /// Whether the failure is transient, regardless of the remaining budget.
    pub fn is_retryable(status: Option<u16>, error_kind: Option<TransportErrorKind>) -> bool {
        match (status, error_kind) {
            (Some(status), _) => is_retryable_status(status),
            (None, Some(kind)) => kind == TransportErrorKind::Timeout,
            (None, None) => false,
        }
    }

    /// Delay to wait after attempt `attempt` (1-based) fails: `base * 2^(attempt-1)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);

        if self.jitter {
            let max_jitter_ms = (delay.as_millis() / 10) as u64;
            if max_jitter_ms > 0 {
                let extra = rand::rng().random_range(0..=max_jitter_ms);
                return delay.saturating_add(Duration::from_millis(extra));
            }
        }
        delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1_000))
    }
}
