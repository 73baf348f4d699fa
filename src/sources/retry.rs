use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use crate::config::RetryConfig;
use crate::error::FetchError;

/// Bounded exponential backoff around a single-fetch primitive.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    min_attempt: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, min_attempt: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
            min_attempt,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        RetryPolicy::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.min_attempt_ms),
        )
    }

    /// Single attempt, no backoff.
    pub fn none() -> Self {
        RetryPolicy::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff after the `failed`-th failed attempt: base, 2*base, 4*base, ...
    pub fn backoff(&self, failed: u32) -> Duration {
        let exp = failed.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }

    /// Delay before the next attempt, or `None` when retrying is pointless or
    /// would not fit in the `remaining` budget.
    pub fn next_delay(&self, failed: u32, error: &FetchError, remaining: Duration) -> Option<Duration> {
        if failed >= self.max_attempts || !error.is_retryable() {
            return None;
        }
        let delay = self.backoff(failed);
        if delay + self.min_attempt > remaining {
            return None;
        }
        Some(delay)
    }

    /// Runs `op` until it succeeds, the attempts run out, or `deadline` is
    /// near. Each attempt is cut off at `attempt_timeout` or at the deadline,
    /// whichever comes first.
    pub async fn run<T, F, Fut>(
        &self,
        deadline: Instant,
        attempt_timeout: Duration,
        mut op: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut failed = 0u32;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FetchError::Timeout { after_ms: 0 });
            }
            let budget = attempt_timeout.min(remaining);

            let error = match tokio::time::timeout(budget, op(failed)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => FetchError::Timeout { after_ms: budget.as_millis() as u64 },
            };

            failed += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.next_delay(failed, &error, remaining) {
                Some(delay) => {
                    tracing::debug!("Attempt {} failed ({}), retrying in {:?}", failed, error, delay);
                    tokio::time::sleep(delay).await;
                }
                None => return Err(error),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from_config(&RetryConfig::default())
    }
}
