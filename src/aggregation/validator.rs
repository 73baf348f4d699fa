use std::time::Duration;
use crate::config::{SanityConfig, StalenessConfig};
use crate::types::data_point::{DataPoint, SanityFlag, ValidatedPoint, ValidationFailure, Verdict};
use crate::types::instrument::{InstrumentKind, Metric};
use crate::types::timestamp::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SignRule {
    Positive,
    NonNegative,
    Any,
}

fn sign_rule(metric: Metric) -> SignRule {
    match metric {
        Metric::Price | Metric::Tvl => SignRule::Positive,
        Metric::Apy | Metric::Volume24h => SignRule::NonNegative,
        // funding flips sign with the basis
        Metric::FundingRate => SignRule::Any,
    }
}

/// Stateless per-point sanity filter. Failing points are marked, never dropped.
#[derive(Clone, Debug, Default)]
pub struct Validator {
    staleness: StalenessConfig,
    sanity: SanityConfig,
}

impl Validator {
    pub fn new(staleness: StalenessConfig, sanity: SanityConfig) -> Self {
        Validator { staleness, sanity }
    }

    pub fn validate_all(&self, kind: InstrumentKind, points: Vec<DataPoint>, now: Timestamp) -> Vec<ValidatedPoint> {
        points.into_iter()
            .map(|point| self.validate(kind, point, now))
            .collect()
    }

    pub fn validate(&self, kind: InstrumentKind, point: DataPoint, now: Timestamp) -> ValidatedPoint {
        let mut verdict = Verdict::default();

        // Timestamp checks
        let max_age = self.staleness.max_age(kind);
        let skew = Duration::from_secs(self.staleness.future_skew_secs);
        if point.observed_at > now + skew {
            verdict.failures.push(ValidationFailure::Malformed {
                detail: format!("observed_at {} is ahead of now {}", point.observed_at, now),
            });
        } else {
            let age = point.observed_at.age_at(now);
            if age > max_age {
                verdict.failures.push(ValidationFailure::Stale {
                    metric: point.metric,
                    age_ms: age.as_millis() as u64,
                    max_ms: max_age.as_millis() as u64,
                });
            }
        }

        // Value checks, primary first
        if point.metric != kind.primary_metric() {
            verdict.failures.push(ValidationFailure::Malformed {
                detail: format!("expected {} but source reported {}", kind.primary_metric(), point.metric),
            });
        }
        self.check_value(point.metric, point.value, &mut verdict);
        for (metric, value) in &point.secondary {
            self.check_value(*metric, *value, &mut verdict);
        }

        for flag in &verdict.flags {
            let SanityFlag::AboveSoftCeiling { metric, value, ceiling } = flag;
            tracing::warn!(
                "Unusually high {} for {} from {}: {} (soft ceiling {})",
                metric, point.instrument, point.source, value, ceiling
            );
        }
        if !verdict.is_valid() {
            tracing::debug!(
                "Rejected point from {} for {}: {:?}",
                point.source, point.instrument, verdict.failures
            );
        }

        ValidatedPoint { point, verdict }
    }

    fn check_value(&self, metric: Metric, value: f64, verdict: &mut Verdict) {
        if !value.is_finite() {
            verdict.failures.push(ValidationFailure::Malformed {
                detail: format!("{} is not finite", metric),
            });
            return;
        }

        match sign_rule(metric) {
            SignRule::Positive if value <= 0.0 => {
                verdict.failures.push(ValidationFailure::NonPositive { metric, value });
                return;
            }
            SignRule::NonNegative if value < 0.0 => {
                verdict.failures.push(ValidationFailure::Negative { metric, value });
                return;
            }
            _ => {}
        }

        // Soft ceiling: visible, not rejected
        let ceiling = self.sanity.ceiling(metric);
        if value.abs() > ceiling {
            verdict.flags.push(SanityFlag::AboveSoftCeiling { metric, value, ceiling });
        }
    }
}
