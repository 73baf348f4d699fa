use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use dashmap::DashMap;
use tokio::sync::Mutex;
use crate::aggregation::consensus::{ConsensusEngine, ConsensusResult};
use crate::aggregation::orchestrator::{FetchOrchestrator, RoundOutcome};
use crate::aggregation::validator::Validator;
use crate::config::FeedConfig;
use crate::core::report::{ConsensusOutcome, ConsensusReport, SourceStatus};
use crate::error::{Error, Result};
use crate::monitoring::alerts::{Alert, AlertSink, AlertSummary};
use crate::monitoring::anomaly::AnomalyDetector;
use crate::monitoring::quality::{QualityReport, QualityScorer};
use crate::observability::metrics;
use crate::observability::tracing::trace_round;
use crate::sources::SourceRegistry;
use crate::types::ids::InstrumentId;
use crate::types::instrument::Instrument;
use crate::types::timestamp::Timestamp;

/// Owns the pipeline for a fixed set of instruments: fetch, validate,
/// aggregate, detect, score, record.
///
/// Rounds for one instrument are serialized by its slot; rounds for
/// different instruments run concurrently.
pub struct FeedEngine {
    config: FeedConfig,
    instruments: BTreeMap<InstrumentId, Instrument>,
    registry: Arc<SourceRegistry>,
    orchestrator: FetchOrchestrator,
    validator: Validator,
    consensus: ConsensusEngine,
    detector: AnomalyDetector,
    scorer: QualityScorer,
    alerts: AlertSink,
    slots: HashMap<InstrumentId, Mutex<()>>,
    latest: DashMap<InstrumentId, ConsensusOutcome>,
}

impl FeedEngine {
    pub fn new(config: FeedConfig, registry: Arc<SourceRegistry>, instruments: Vec<Instrument>) -> Result<Self> {
        config.validate()?;

        let mut by_id = BTreeMap::new();
        for instrument in instruments {
            if registry.supporting(&instrument).is_empty() {
                tracing::warn!("No registered source serves {}", instrument.id);
            }
            if let Some(dup) = by_id.insert(instrument.id.clone(), instrument) {
                return Err(Error::ConfigError(format!("duplicate instrument {}", dup.id)));
            }
        }
        let slots = by_id.keys().map(|id| (id.clone(), Mutex::new(()))).collect();

        Ok(FeedEngine {
            orchestrator: FetchOrchestrator::new(registry.clone(), &config.fetch),
            validator: Validator::new(config.staleness.clone(), config.sanity.clone()),
            consensus: ConsensusEngine::new(config.consensus.clone()),
            detector: AnomalyDetector::new(config.anomaly.clone()),
            scorer: QualityScorer::new(config.quality.clone()),
            alerts: AlertSink::new(&config.alerts),
            instruments: by_id,
            registry,
            slots,
            latest: DashMap::new(),
            config,
        })
    }

    /// Runs one full round for `id`. `Err` only for instruments the engine
    /// does not know; a round without usable data is `Ok(Unavailable)`.
    pub async fn get_consensus(&self, id: &InstrumentId) -> Result<ConsensusOutcome> {
        let instrument = self.instrument(id)?;
        let slot = self.slots.get(id).ok_or_else(|| Error::UnknownInstrument(id.clone()))?;
        let _guard = slot.lock().await;

        metrics::ROUNDS_TOTAL.inc();
        let timer = metrics::ROUND_LATENCY.start_timer();
        let round = self.orchestrator.run_round(instrument).await;
        let outcome = self.evaluate(instrument, round, Timestamp::now());
        timer.observe_duration();

        self.latest.insert(id.clone(), outcome.clone());
        Ok(outcome)
    }

    /// Quality of the latest delivered consensus, freshness aged to now.
    /// `None` before the first round or when the latest round was unavailable.
    pub fn get_quality(&self, id: &InstrumentId) -> Result<Option<QualityReport>> {
        let instrument = self.instrument(id)?;
        let quality = self.latest.get(id).and_then(|outcome| {
            outcome.report().map(|report| self.quality_at(instrument, &report.result, Timestamp::now()))
        });
        Ok(quality)
    }

    pub fn latest(&self, id: &InstrumentId) -> Result<Option<ConsensusOutcome>> {
        self.instrument(id)?;
        Ok(self.latest.get(id).map(|outcome| outcome.clone()))
    }

    pub fn get_recent_alerts(&self, window_secs: u64) -> Vec<Alert> {
        self.alerts.query(Duration::from_secs(window_secs))
    }

    pub fn get_source_status(&self) -> Vec<SourceStatus> {
        self.registry.statuses()
    }

    pub fn status_summary(&self) -> AlertSummary {
        let window = Duration::from_secs(self.config.alerts.summary_window_secs);
        self.alerts.summary_at(window, Timestamp::now())
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.values()
    }

    pub fn alert_sink(&self) -> &AlertSink {
        &self.alerts
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    fn instrument(&self, id: &InstrumentId) -> Result<&Instrument> {
        self.instruments.get(id).ok_or_else(|| Error::UnknownInstrument(id.clone()))
    }

    fn quality_at(&self, instrument: &Instrument, result: &ConsensusResult, now: Timestamp) -> QualityReport {
        let (available, total) = self.registry.availability_for(instrument);
        self.scorer.score(
            instrument.kind,
            result.oldest_observation.age_at(now),
            available,
            total,
            result.dispersion,
            result.estimate,
        )
    }

    fn evaluate(&self, instrument: &Instrument, round: RoundOutcome, now: Timestamp) -> ConsensusOutcome {
        let span = trace_round(&instrument.id, round.round_id);
        let _entered = span.enter();

        let points = self.validator.validate_all(instrument.kind, round.points, now);
        let mut alerts = Vec::new();

        let computed = match self.consensus.compute(instrument, &points, now) {
            Ok(result) => {
                alerts.extend(self.detector.check_consensus(instrument, &result, &points));
                let quality = self.quality_at(instrument, &result, now);
                metrics::QUALITY_SCORE
                    .with_label_values(&[instrument.id.as_str()])
                    .set(quality.score);

                tracing::info!(
                    "Consensus for {}: {} from {}/{} points (quality {:.3})",
                    instrument.id, result.estimate, result.filtered_points, points.len(), quality.score
                );
                if !quality.acceptable {
                    tracing::warn!("Quality for {} below minimum: {:?}", instrument.id, quality.rounded());
                }
                Ok((result, quality))
            }
            Err(unavailable) => {
                metrics::ROUNDS_UNAVAILABLE
                    .with_label_values(&[unavailable.reason.as_str()])
                    .inc();
                tracing::warn!(
                    "No consensus for {}: {} ({} received, {} valid, {} failed, {} timed out)",
                    instrument.id,
                    unavailable.reason.as_str(),
                    unavailable.received_points,
                    unavailable.valid_points,
                    round.failures.len(),
                    round.timed_out.len()
                );
                Err(unavailable)
            }
        };

        alerts.extend(self.detector.check_sources(&self.registry.statuses(), now));
        for alert in &alerts {
            self.alerts.append(alert.clone());
        }

        match computed {
            Ok((result, quality)) => ConsensusOutcome::Available(Box::new(ConsensusReport {
                round_id: round.round_id,
                result,
                quality,
                points,
                failures: round.failures,
                timed_out: round.timed_out,
                alerts,
            })),
            Err(unavailable) => ConsensusOutcome::Unavailable(unavailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::connectors::scripted::{Scripted, ScriptedSource};
    use crate::types::instrument::InstrumentKind;

    fn engine(sources: Vec<ScriptedSource>) -> FeedEngine {
        let config = FeedConfig::default();
        let mut registry = SourceRegistry::new(&config);
        for source in sources {
            registry.register(Arc::new(source)).unwrap();
        }
        let btc = Instrument::new("BTC", InstrumentKind::SpotPrice);
        FeedEngine::new(config, Arc::new(registry), vec![btc]).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_instrument_is_an_error() {
        let engine = engine(vec![]);
        let err = engine.get_consensus(&"DOGE".into()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownInstrument(_)));
        assert!(engine.get_quality(&"DOGE".into()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn quality_follows_latest_round() {
        let engine = engine(vec![
            ScriptedSource::new("a").with_response("BTC", Scripted::Value(100.0)),
            ScriptedSource::new("b").with_response("BTC", Scripted::Value(100.0)),
        ]);
        let btc = InstrumentId::from("BTC");
        assert_eq!(engine.get_quality(&btc).unwrap(), None);

        let outcome = engine.get_consensus(&btc).await.unwrap();
        assert_eq!(outcome.estimate(), Some(100.0));
        let quality = engine.get_quality(&btc).unwrap().unwrap();
        assert!(quality.acceptable);
        assert_eq!(quality.availability, 1.0);
        assert!(engine.latest(&btc).unwrap().unwrap().is_available());
    }

    #[test]
    fn duplicate_instruments_are_rejected() {
        let config = FeedConfig::default();
        let registry = Arc::new(SourceRegistry::new(&config));
        let btc = Instrument::new("BTC", InstrumentKind::SpotPrice);
        let result = FeedEngine::new(config, registry, vec![btc.clone(), btc]);
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }
}
