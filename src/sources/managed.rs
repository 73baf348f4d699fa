use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use crate::error::FetchError;
use crate::observability::metrics;
use crate::sources::connectors::SourceAdapter;
use crate::sources::health::{SourceHealth, SourceState};
use crate::sources::retry::RetryPolicy;
use crate::types::data_point::DataPoint;
use crate::types::ids::SourceId;
use crate::types::instrument::Instrument;
use crate::types::timestamp::Timestamp;

/// An adapter plus the retry policy, per-attempt timeout and health record
/// that every round shares.
pub struct ManagedSource {
    adapter: Arc<dyn SourceAdapter>,
    health: SourceHealth,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl ManagedSource {
    pub fn new(
        adapter: Arc<dyn SourceAdapter>,
        retry: RetryPolicy,
        attempt_timeout: Duration,
        failure_threshold: u32,
    ) -> Self {
        let health = SourceHealth::new(adapter.source_id(), failure_threshold);
        ManagedSource { adapter, health, retry, attempt_timeout }
    }

    pub fn id(&self) -> SourceId {
        self.adapter.source_id()
    }

    pub fn supports(&self, instrument: &Instrument) -> bool {
        self.adapter.supports(instrument)
    }

    pub fn health(&self) -> &SourceHealth {
        &self.health
    }

    pub fn status(&self) -> SourceState {
        self.health.snapshot()
    }

    /// Fetches with retries, never running past `deadline`. The outcome is
    /// recorded against this source's health before it is returned.
    pub async fn fetch(&self, instrument: &Instrument, deadline: Instant) -> Result<DataPoint, FetchError> {
        let result = self.retry
            .run(deadline, self.attempt_timeout, |attempt| {
                if attempt > 0 {
                    tracing::debug!("Retry {} of {} for {}", attempt, self.id(), instrument.id);
                }
                self.adapter.fetch(instrument)
            })
            .await;

        let now = Timestamp::now();
        match &result {
            Ok(_) => self.health.record_success(now),
            Err(e) => {
                metrics::SOURCE_FETCH_FAILURES
                    .with_label_values(&[self.id().as_str(), e.kind()])
                    .inc();
                tracing::warn!("Fetch from {} for {} failed: {}", self.id(), instrument.id, e);
                self.health.record_failure(now, e);
            }
        }
        result
    }
}
