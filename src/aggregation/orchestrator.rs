use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::Instrument as _;
use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::observability::metrics;
use crate::observability::tracing::trace_fetch;
use crate::sources::SourceRegistry;
use crate::types::data_point::DataPoint;
use crate::types::ids::{InstrumentId, SourceId};
use crate::types::instrument::Instrument;
use crate::types::timestamp::Timestamp;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceFailure {
    pub source: SourceId,
    pub error: FetchError,
}

/// Everything one fan-out produced. Sources that had not answered by the
/// round deadline are listed in `timed_out`; their results are discarded.
#[derive(Clone, Debug, Serialize)]
pub struct RoundOutcome {
    pub round_id: u64,
    pub instrument: InstrumentId,
    pub started_at: Timestamp,
    pub points: Vec<DataPoint>,
    pub failures: Vec<SourceFailure>,
    pub timed_out: Vec<SourceId>,
}

impl RoundOutcome {
    pub fn attempted(&self) -> usize {
        self.points.len() + self.failures.len() + self.timed_out.len()
    }
}

/// One adapter's answer on its round's channel.
struct FetchMessage {
    source: SourceId,
    result: Result<DataPoint, FetchError>,
}

/// Fans one instrument out to every supporting source concurrently and
/// gathers whatever arrives before the round deadline.
pub struct FetchOrchestrator {
    registry: Arc<SourceRegistry>,
    adapter_budget: Duration,
    round_deadline: Duration,
    next_round: AtomicU64,
}

impl FetchOrchestrator {
    pub fn new(registry: Arc<SourceRegistry>, config: &FetchConfig) -> Self {
        Self::with_timing(registry, config.adapter_budget(), config.round_deadline())
    }

    pub(crate) fn with_timing(registry: Arc<SourceRegistry>, adapter_budget: Duration, round_deadline: Duration) -> Self {
        FetchOrchestrator {
            registry,
            adapter_budget,
            round_deadline,
            next_round: AtomicU64::new(0),
        }
    }

    pub async fn run_round(&self, instrument: &Instrument) -> RoundOutcome {
        let round_id = self.next_round.fetch_add(1, Ordering::SeqCst) + 1;
        let sources = self.registry.supporting(instrument);
        let started_at = Timestamp::now();
        let start = Instant::now();
        let adapter_deadline = start + self.adapter_budget;
        let round_deadline = start + self.round_deadline;

        tracing::debug!("Round {} for {}: {} sources", round_id, instrument.id, sources.len());

        let mut pending: BTreeSet<SourceId> = BTreeSet::new();
        let (tx, mut rx) = mpsc::channel(sources.len().max(1));
        let shared = Arc::new(instrument.clone());

        for source in sources {
            let id = source.id();
            pending.insert(id.clone());
            let tx = tx.clone();
            let instrument = shared.clone();
            let span = trace_fetch(&id, &instrument.id);

            tokio::spawn(async move {
                let result = source.fetch(&instrument, adapter_deadline).await;
                let message = FetchMessage { source: id, result };
                if let Err(mpsc::error::SendError(late)) = tx.send(message).await {
                    metrics::LATE_RESULTS_DISCARDED.inc();
                    tracing::debug!("Discarding late result from {} for closed round {}", late.source, round_id);
                }
            }.instrument(span));
        }
        drop(tx);

        let mut points = Vec::new();
        let mut failures = Vec::new();
        loop {
            match tokio::time::timeout_at(round_deadline, rx.recv()).await {
                Ok(Some(message)) => {
                    if !pending.remove(&message.source) {
                        tracing::warn!("Ignoring duplicate result from {} in round {}", message.source, round_id);
                        continue;
                    }
                    match message.result {
                        Ok(point) => points.push(point),
                        Err(error) => failures.push(SourceFailure { source: message.source, error }),
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Round {} for {} hit its deadline with {} sources outstanding",
                        round_id, instrument.id, pending.len()
                    );
                    break;
                }
            }
        }

        // Close the round: anything already buffered or still in flight is late.
        rx.close();
        while let Ok(late) = rx.try_recv() {
            metrics::LATE_RESULTS_DISCARDED.inc();
            tracing::debug!("Discarding late result from {} for closed round {}", late.source, round_id);
        }

        failures.sort_by(|a: &SourceFailure, b| a.source.cmp(&b.source));
        RoundOutcome {
            round_id,
            instrument: instrument.id.clone(),
            started_at,
            points,
            failures,
            timed_out: pending.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use crate::sources::connectors::scripted::{Scripted, ScriptedSource};
    use crate::types::instrument::InstrumentKind;

    fn btc() -> Instrument {
        Instrument::new("BTC", InstrumentKind::SpotPrice)
    }

    fn orchestrator(sources: Vec<ScriptedSource>) -> FetchOrchestrator {
        let config = FeedConfig::default();
        let mut registry = SourceRegistry::new(&config);
        for source in sources {
            registry.register(Arc::new(source)).unwrap();
        }
        FetchOrchestrator::new(Arc::new(registry), &config.fetch)
    }

    #[tokio::test(start_paused = true)]
    async fn gathers_points_and_failures() {
        let orchestrator = orchestrator(vec![
            ScriptedSource::new("a").with_response("BTC", Scripted::Value(100.0)),
            ScriptedSource::new("b").with_response("BTC", Scripted::Value(101.0)),
            ScriptedSource::new("c").with_response("BTC", Scripted::Fail(FetchError::Parse("bad".into()))),
        ]);

        let outcome = orchestrator.run_round(&btc()).await;
        assert_eq!(outcome.round_id, 1);
        assert_eq!(outcome.points.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].source, SourceId::from("c"));
        assert!(outcome.timed_out.is_empty());
        assert_eq!(outcome.attempted(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_source_does_not_hold_the_round() {
        let orchestrator = orchestrator(vec![
            ScriptedSource::new("fast").with_response("BTC", Scripted::Value(100.0)),
            ScriptedSource::new("hung").with_response(
                "BTC",
                Scripted::delayed(Duration::from_secs(3_600), Scripted::Value(100.0)),
            ),
        ]);

        let start = Instant::now();
        let outcome = orchestrator.run_round(&btc()).await;
        let bound = FeedConfig::default().fetch.round_deadline();
        assert!(start.elapsed() <= bound);
        assert_eq!(outcome.points.len(), 1);
        // the hung adapter is cut off by its own budget before the round closes
        assert_eq!(outcome.failures.len() + outcome.timed_out.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn result_after_close_is_discarded() {
        let config = FeedConfig::default();
        let mut registry = SourceRegistry::new(&config);
        registry.register(Arc::new(ScriptedSource::new("fast").with_response("BTC", Scripted::Value(100.0)))).unwrap();
        registry.register(Arc::new(ScriptedSource::new("slow").with_response(
            "BTC",
            Scripted::delayed(Duration::from_secs(3), Scripted::Value(250.0)),
        ))).unwrap();
        let registry = Arc::new(registry);
        // the round closes well before the slow adapter's budget runs out
        let orchestrator = FetchOrchestrator::with_timing(
            registry.clone(),
            Duration::from_secs(10),
            Duration::from_secs(1),
        );

        let discarded = metrics::LATE_RESULTS_DISCARDED.get();
        let outcome = orchestrator.run_round(&btc()).await;
        assert_eq!(outcome.timed_out, vec![SourceId::from("slow")]);
        assert_eq!(outcome.points.len(), 1);
        assert_eq!(outcome.points[0].source, SourceId::from("fast"));
        assert!(outcome.failures.is_empty());

        // let the slow fetch finish against the closed round
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(metrics::LATE_RESULTS_DISCARDED.get() > discarded);
        let slow = registry.get(&SourceId::from("slow")).unwrap();
        assert_eq!(slow.status().total_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn round_ids_increase() {
        let orchestrator = orchestrator(vec![
            ScriptedSource::new("a").with_response("BTC", Scripted::Value(100.0)),
        ]);
        let first = orchestrator.run_round(&btc()).await;
        let second = orchestrator.run_round(&btc()).await;
        assert!(second.round_id > first.round_id);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_instrument_yields_empty_round() {
        let orchestrator = orchestrator(vec![
            ScriptedSource::new("a").with_response("ETH", Scripted::Value(1.0)),
        ]);
        let outcome = orchestrator.run_round(&btc()).await;
        assert_eq!(outcome.attempted(), 0);
    }
}
