//! Anomaly checks run after every round.
//!
//! Consensus checks compare the new estimate with the instrument's own
//! history and with the individual source values of the round. Source checks
//! look at the health of the whole registry.

use dashmap::DashMap;
use crate::config::AnomalyConfig;
use crate::aggregation::consensus::ConsensusResult;
use crate::monitoring::alerts::{Alert, AlertDetails, AlertSubject, Severity, SourceDeviation};
use crate::monitoring::window::RollingWindow;
use crate::sources::health::SourceState;
use crate::types::data_point::ValidatedPoint;
use crate::types::ids::InstrumentId;
use crate::types::instrument::{Instrument, InstrumentKind, Metric};
use crate::types::timestamp::Timestamp;
use crate::utils::helper::relative_change;

pub struct AnomalyDetector {
    config: AnomalyConfig,
    history: DashMap<InstrumentId, RollingWindow<f64>>,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        AnomalyDetector {
            config,
            history: DashMap::new(),
        }
    }

    /// Runs every consensus-level check and records the estimate in the
    /// instrument's history.
    pub fn check_consensus(
        &self,
        instrument: &Instrument,
        result: &ConsensusResult,
        points: &[ValidatedPoint],
    ) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let at = result.computed_at;

        if let Some(previous) = self.record(&instrument.id, result.estimate, at) {
            alerts.extend(self.check_volatility(instrument, previous, result.estimate, at));
            if instrument.kind == InstrumentKind::Pool {
                alerts.extend(self.check_tvl_drop(&instrument.id, previous, result.estimate, at));
            }
        }
        alerts.extend(self.check_divergence(instrument, result.estimate, points, at));
        if instrument.kind == InstrumentKind::Pool {
            alerts.extend(self.check_pool_levels(&instrument.id, result, at));
        }
        alerts
    }

    /// Appends `estimate` and returns the previous in-window estimate.
    /// Out-of-order estimates are ignored.
    fn record(&self, instrument: &InstrumentId, estimate: f64, at: Timestamp) -> Option<f64> {
        let mut history = self.history
            .entry(instrument.clone())
            .or_insert_with(|| RollingWindow::new(self.config.history_window(), self.config.history_capacity));

        history.prune(at);
        let previous = match history.last() {
            Some((last_at, _)) if at <= last_at => {
                tracing::warn!("Out-of-order estimate for {} at {} (last {}), skipping history", instrument, at, last_at);
                return None;
            }
            Some((_, value)) => Some(*value),
            None => None,
        };
        history.push(at, estimate);
        previous
    }

    pub fn history_len(&self, instrument: &InstrumentId) -> usize {
        self.history.get(instrument).map(|h| h.len()).unwrap_or(0)
    }

    /// `change` is relative for prices and pools, absolute for funding rates.
    pub fn check_volatility(&self, instrument: &Instrument, previous: f64, current: f64, at: Timestamp) -> Option<Alert> {
        let change = distance(instrument.kind, previous, current)?;
        let severity = self.config.volatility_for(instrument.kind).classify(change)?;
        Some(Alert::new(
            AlertSubject::Instrument(instrument.id.clone()),
            severity,
            at,
            AlertDetails::Volatility { previous, current, change },
        ))
    }

    /// Fires when at least `min_fraction` of the valid points sit more than
    /// the kind's divergence distance away from the estimate. Rejected
    /// outliers count too.
    pub fn check_divergence(
        &self,
        instrument: &Instrument,
        estimate: f64,
        points: &[ValidatedPoint],
        at: Timestamp,
    ) -> Option<Alert> {
        let valid: Vec<_> = points.iter().filter(|p| p.is_valid()).map(|p| &p.point).collect();
        if valid.is_empty() {
            return None;
        }

        let limit = self.config.divergence_for(instrument.kind);
        let divergent: Vec<SourceDeviation> = valid.iter()
            .filter_map(|p| {
                let deviation = distance(instrument.kind, estimate, p.value)?;
                (deviation > limit).then(|| SourceDeviation {
                    source: p.source.clone(),
                    value: p.value,
                    deviation,
                })
            })
            .collect();

        let fraction = divergent.len() as f64 / valid.len() as f64;
        if divergent.is_empty() || fraction < self.config.divergence.min_fraction {
            return None;
        }
        Some(Alert::new(
            AlertSubject::Instrument(instrument.id.clone()),
            Severity::Warning,
            at,
            AlertDetails::Divergence { estimate, divergent, considered: valid.len() },
        ))
    }

    pub fn check_tvl_drop(&self, instrument: &InstrumentId, previous: f64, current: f64, at: Timestamp) -> Option<Alert> {
        if current >= previous {
            return None;
        }
        let drop = relative_change(previous, current)?;
        let severity = self.config.pool.tvl_drop.classify(drop)?;
        Some(Alert::new(
            AlertSubject::Instrument(instrument.clone()),
            severity,
            at,
            AlertDetails::TvlDrop { previous, current, drop },
        ))
    }

    /// Static pool health: APY range, minimum liquidity and turnover.
    pub fn check_pool_levels(&self, instrument: &InstrumentId, result: &ConsensusResult, at: Timestamp) -> Vec<Alert> {
        let pool = &self.config.pool;
        let subject = AlertSubject::Instrument(instrument.clone());
        let tvl = result.estimate;
        let mut alerts = Vec::new();

        if let Some(apy) = result.secondary.get(&Metric::Apy).map(|s| s.median) {
            if apy < pool.min_apy || apy > pool.max_apy {
                alerts.push(Alert::new(
                    subject.clone(),
                    Severity::Warning,
                    at,
                    AlertDetails::ApyOutOfRange { apy, min: pool.min_apy, max: pool.max_apy },
                ));
            }
        }

        if tvl < pool.min_tvl {
            alerts.push(Alert::new(
                subject.clone(),
                Severity::Warning,
                at,
                AlertDetails::LowLiquidity { tvl, min_tvl: pool.min_tvl },
            ));
        }

        if let Some(volume) = result.secondary.get(&Metric::Volume24h).map(|s| s.median) {
            if tvl > 0.0 {
                let ratio = volume / tvl;
                if ratio < pool.min_volume_tvl_ratio {
                    alerts.push(Alert::new(
                        subject,
                        Severity::Info,
                        at,
                        AlertDetails::LowVolumeRatio { ratio, min_ratio: pool.min_volume_tvl_ratio },
                    ));
                }
            }
        }
        alerts
    }

    /// Delay per source plus the registry-wide failure check.
    pub fn check_sources(&self, statuses: &[SourceState], now: Timestamp) -> Vec<Alert> {
        let mut alerts = self.check_delays(statuses, now);
        alerts.extend(self.check_system_failure(statuses, now));
        alerts
    }

    /// Sources that have never succeeded have no delay to measure.
    pub fn check_delays(&self, statuses: &[SourceState], now: Timestamp) -> Vec<Alert> {
        statuses.iter()
            .filter_map(|status| {
                let last_success = status.last_success?;
                let delay = last_success.age_at(now);
                let severity = self.config.delay.classify(delay)?;
                Some(Alert::new(
                    AlertSubject::Source(status.name.clone()),
                    severity,
                    now,
                    AlertDetails::Delay {
                        delay_secs: delay.as_secs(),
                        max_delay_secs: self.config.delay.warning_secs,
                    },
                ))
            })
            .collect()
    }

    pub fn check_system_failure(&self, statuses: &[SourceState], now: Timestamp) -> Option<Alert> {
        let total = statuses.len();
        if total == 0 {
            return None;
        }
        let unavailable = statuses.iter().filter(|s| !s.available).count();
        if (unavailable as f64 / total as f64) <= self.config.system_failure_fraction {
            return None;
        }
        Some(Alert::new(
            AlertSubject::Feed,
            Severity::Critical,
            now,
            AlertDetails::SystemFailure { unavailable, total },
        ))
    }
}

/// Relative change, except for funding rates where the plain difference is
/// used. `None` when a relative change has no reference to scale by.
fn distance(kind: InstrumentKind, reference: f64, value: f64) -> Option<f64> {
    match kind {
        InstrumentKind::FundingRate => Some((value - reference).abs()),
        _ => relative_change(reference, value),
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        AnomalyDetector::new(AnomalyConfig::default())
    }
}
