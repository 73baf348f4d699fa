use std::sync::Mutex;
use serde::{Deserialize, Serialize};
use crate::error::FetchError;
use crate::types::ids::SourceId;
use crate::types::timestamp::Timestamp;

/// Health of one provider, shared by every round that uses it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceState {
    pub name: SourceId,
    pub available: bool,
    pub last_success: Option<Timestamp>,
    pub last_failure: Option<Timestamp>,
    pub consecutive_errors: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
}

impl SourceState {
    fn new(name: SourceId) -> Self {
        SourceState {
            name,
            available: true,
            last_success: None,
            last_failure: None,
            consecutive_errors: 0,
            total_successes: 0,
            total_failures: 0,
            last_error: None,
        }
    }
}

pub struct SourceHealth {
    failure_threshold: u32,
    state: Mutex<SourceState>,
}

impl SourceHealth {
    pub fn new(name: SourceId, failure_threshold: u32) -> Self {
        SourceHealth {
            failure_threshold: failure_threshold.max(1),
            state: Mutex::new(SourceState::new(name)),
        }
    }

    pub fn record_success(&self, at: Timestamp) {
        let mut state = self.lock();
        if !state.available {
            tracing::info!("Source {} recovered after {} errors", state.name, state.consecutive_errors);
        }
        state.available = true;
        state.consecutive_errors = 0;
        state.total_successes += 1;
        state.last_success = Some(match state.last_success {
            Some(prev) if prev > at => prev,
            _ => at,
        });
    }

    /// Returns true when this failure flipped the source to unavailable.
    pub fn record_failure(&self, at: Timestamp, error: &FetchError) -> bool {
        let mut state = self.lock();
        state.consecutive_errors = state.consecutive_errors.saturating_add(1);
        state.total_failures += 1;
        state.last_failure = Some(at);
        state.last_error = Some(error.to_string());

        if state.available && state.consecutive_errors >= self.failure_threshold {
            state.available = false;
            tracing::warn!(
                "Source {} marked unavailable after {} consecutive errors (last: {})",
                state.name, state.consecutive_errors, error
            );
            return true;
        }
        false
    }

    pub fn is_available(&self) -> bool {
        self.lock().available
    }

    pub fn snapshot(&self) -> SourceState {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout() -> FetchError {
        FetchError::Timeout { after_ms: 5_000 }
    }

    #[test]
    fn flips_unavailable_only_at_threshold() {
        let health = SourceHealth::new("coingecko".into(), 3);
        assert!(!health.record_failure(Timestamp::from_secs(1), &timeout()));
        assert!(!health.record_failure(Timestamp::from_secs(2), &timeout()));
        assert!(health.is_available());
        assert!(health.record_failure(Timestamp::from_secs(3), &timeout()));
        assert!(!health.is_available());
        // further failures don't re-trigger
        assert!(!health.record_failure(Timestamp::from_secs(4), &timeout()));
        assert_eq!(health.snapshot().consecutive_errors, 4);
    }

    #[test]
    fn success_resets_streak_and_availability() {
        let health = SourceHealth::new("binance".into(), 2);
        health.record_failure(Timestamp::from_secs(1), &timeout());
        health.record_failure(Timestamp::from_secs(2), &timeout());
        assert!(!health.is_available());

        health.record_success(Timestamp::from_secs(3));
        let state = health.snapshot();
        assert!(state.available);
        assert_eq!(state.consecutive_errors, 0);
        assert_eq!(state.last_success, Some(Timestamp::from_secs(3)));
        assert_eq!(state.total_failures, 2);
        assert_eq!(state.total_successes, 1);
    }

    #[test]
    fn interleaved_failure_resets_count_after_success() {
        let health = SourceHealth::new("bybit".into(), 3);
        health.record_failure(Timestamp::from_secs(1), &timeout());
        health.record_failure(Timestamp::from_secs(2), &timeout());
        health.record_success(Timestamp::from_secs(3));
        health.record_failure(Timestamp::from_secs(4), &timeout());
        health.record_failure(Timestamp::from_secs(5), &timeout());
        assert!(health.is_available());
    }
}
