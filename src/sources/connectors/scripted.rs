use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use crate::error::FetchError;
use crate::sources::connectors::SourceAdapter;
use crate::types::data_point::DataPoint;
use crate::types::ids::{InstrumentId, SourceId};
use crate::types::instrument::{Instrument, Metric};
use crate::types::timestamp::Timestamp;

/// What a [`ScriptedSource`] does on one fetch.
#[derive(Clone, Debug)]
pub enum Scripted {
    Value(f64),
    /// Value with an explicit observation time.
    ObservedAt(f64, Timestamp),
    WithSecondary(f64, Vec<(Metric, f64)>),
    Fail(FetchError),
    /// Sleeps (on the tokio clock) before doing the inner step.
    Delayed(Duration, Box<Scripted>),
}

impl Scripted {
    pub fn delayed(delay: Duration, then: Scripted) -> Self {
        Scripted::Delayed(delay, Box::new(then))
    }
}

#[derive(Default)]
struct Script {
    queued: VecDeque<Scripted>,
    fallback: Option<Scripted>,
}

/// Deterministic in-process adapter for demos and tests. Queued steps are
/// consumed first, then the instrument's standing response repeats.
pub struct ScriptedSource {
    source_id: SourceId,
    scripts: Mutex<HashMap<InstrumentId, Script>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(source_id: impl Into<SourceId>) -> Self {
        ScriptedSource {
            source_id: source_id.into(),
            scripts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_response(self, instrument: impl Into<InstrumentId>, step: Scripted) -> Self {
        self.set_response(instrument, step);
        self
    }

    /// Replaces the standing response for `instrument`.
    pub fn set_response(&self, instrument: impl Into<InstrumentId>, step: Scripted) {
        self.lock().entry(instrument.into()).or_default().fallback = Some(step);
    }

    /// Queues a one-shot step ahead of the standing response.
    pub fn push_step(&self, instrument: impl Into<InstrumentId>, step: Scripted) {
        self.lock().entry(instrument.into()).or_default().queued.push_back(step);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self, instrument: &InstrumentId) -> Option<Scripted> {
        let mut scripts = self.lock();
        let script = scripts.get_mut(instrument)?;
        script.queued.pop_front().or_else(|| script.fallback.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<InstrumentId, Script>> {
        self.scripts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn point(&self, instrument: &Instrument, value: f64, observed_at: Timestamp) -> DataPoint {
        DataPoint::new(
            self.source_id.clone(),
            instrument.id.clone(),
            instrument.kind.primary_metric(),
            value,
            observed_at,
        )
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn source_id(&self) -> SourceId {
        self.source_id.clone()
    }

    fn supports(&self, instrument: &Instrument) -> bool {
        self.lock().contains_key(&instrument.id)
    }

    async fn fetch(&self, instrument: &Instrument) -> Result<DataPoint, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut step = self.next_step(&instrument.id)
            .ok_or_else(|| FetchError::Unsupported(instrument.id.clone()))?;

        loop {
            return match step {
                Scripted::Value(value) => Ok(self.point(instrument, value, Timestamp::now())),
                Scripted::ObservedAt(value, at) => Ok(self.point(instrument, value, at)),
                Scripted::WithSecondary(value, secondary) => {
                    let mut point = self.point(instrument, value, Timestamp::now());
                    for (metric, v) in secondary {
                        point = point.with_secondary(metric, v);
                    }
                    Ok(point)
                }
                Scripted::Fail(error) => Err(error),
                Scripted::Delayed(delay, then) => {
                    tokio::time::sleep(delay).await;
                    step = *then;
                    continue;
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::instrument::InstrumentKind;

    #[tokio::test]
    async fn queued_steps_run_before_standing_response() {
        let btc = Instrument::new("BTC", InstrumentKind::SpotPrice);
        let source = ScriptedSource::new("scripted").with_response("BTC", Scripted::Value(100.0));
        source.push_step("BTC", Scripted::Fail(FetchError::Timeout { after_ms: 1 }));

        assert!(source.fetch(&btc).await.is_err());
        assert_eq!(source.fetch(&btc).await.unwrap().value, 100.0);
        assert_eq!(source.fetch(&btc).await.unwrap().value, 100.0);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_step_waits_on_tokio_clock() {
        let btc = Instrument::new("BTC", InstrumentKind::SpotPrice);
        let source = ScriptedSource::new("slow")
            .with_response("BTC", Scripted::delayed(Duration::from_secs(3), Scripted::Value(1.0)));
        let start = tokio::time::Instant::now();
        source.fetch(&btc).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[test]
    fn supports_only_scripted_instruments() {
        let source = ScriptedSource::new("scripted").with_response("BTC", Scripted::Value(1.0));
        assert!(source.supports(&Instrument::new("BTC", InstrumentKind::SpotPrice)));
        assert!(!source.supports(&Instrument::new("ETH", InstrumentKind::SpotPrice)));
    }
}
