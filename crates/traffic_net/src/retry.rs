//! Backoff policy for outbound calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::NetError;

/// Capped exponential backoff with a per-attempt timeout.
///
/// Attempt `n` (starting at 1) that fails is followed by a pause of
/// `base_delay * multiplier^(n-1)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    #[must_use]
    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Pause after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.base_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Run `op` until it succeeds or the attempts are exhausted, bounding each
    /// attempt by `attempt_timeout`.
    ///
    /// `label` names what is being called, for logging and for the final
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::DeliveryFailed`] once every attempt has failed or
    /// timed out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, NetError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, NetError>>,
    {
        let attempts = self.max_attempts.max(1);
        for attempt in 1..=attempts {
            let error = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => NetError::Timeout(self.attempt_timeout),
            };
            if attempt == attempts {
                warn!(call = label, attempt, error = %error, "giving up");
                break;
            }
            let pause = self.delay(attempt);
            warn!(call = label, attempt, error = %error, retry_in_ms = pause.as_millis() as u64, "attempt failed");
            tokio::time::sleep(pause).await;
        }
        Err(NetError::DeliveryFailed {
            queue: label.to_string(),
            attempts,
        })
    }
}
