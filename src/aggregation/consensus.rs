use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use crate::config::ConsensusConfig;
use crate::types::data_point::ValidatedPoint;
use crate::types::ids::{InstrumentId, SourceId};
use crate::types::instrument::{Instrument, Metric};
use crate::types::timestamp::Timestamp;

/// Robust estimate for one instrument and one round. Built once, never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub instrument: InstrumentId,
    pub metric: Metric,
    pub estimate: f64,
    /// Sample standard deviation of the set the estimate was taken from.
    pub dispersion: f64,
    pub valid_points: usize,
    pub filtered_points: usize,
    pub contributing_sources: Vec<SourceId>,
    /// Valid points dropped by outlier rejection.
    pub rejected_outliers: Vec<SourceId>,
    pub secondary: BTreeMap<Metric, MetricSummary>,
    pub oldest_observation: Timestamp,
    pub computed_at: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub median: f64,
    pub stdev: f64,
    pub samples: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// No source returned anything within the round deadline.
    NoUsablePoints,
    /// Points arrived but too few survived validation.
    InsufficientValidPoints,
}

impl UnavailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnavailableReason::NoUsablePoints => "no_usable_points",
            UnavailableReason::InsufficientValidPoints => "insufficient_valid_points",
        }
    }
}

/// Explicit "no data this round" marker. Callers must not substitute a number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Unavailable {
    pub instrument: InstrumentId,
    pub reason: UnavailableReason,
    pub received_points: usize,
    pub valid_points: usize,
    pub at: Timestamp,
}

pub struct ConsensusEngine {
    config: ConsensusConfig,
}

impl ConsensusEngine {
    pub fn new(config: ConsensusConfig) -> Self {
        ConsensusEngine { config }
    }

    pub fn compute(
        &self,
        instrument: &Instrument,
        points: &[ValidatedPoint],
        computed_at: Timestamp,
    ) -> Result<ConsensusResult, Unavailable> {
        let metric = instrument.kind.primary_metric();
        let valid: Vec<_> = points.iter()
            .filter(|p| p.is_valid())
            .map(|p| &p.point)
            .collect();

        if valid.len() < self.config.min_points {
            tracing::warn!(
                "Not enough valid data points for {}: {} of {}",
                instrument.id, valid.len(), points.len()
            );
            return Err(Unavailable {
                instrument: instrument.id.clone(),
                reason: if points.is_empty() {
                    UnavailableReason::NoUsablePoints
                } else {
                    UnavailableReason::InsufficientValidPoints
                },
                received_points: points.len(),
                valid_points: valid.len(),
                at: computed_at,
            });
        }

        // Step 1: IQR outlier rejection, only with enough points for a majority
        let values: Vec<f64> = valid.iter().map(|p| p.value).collect();
        let keep = if valid.len() >= self.config.iqr_min_points {
            let (lower, upper) = iqr_bounds(&values, self.config.iqr_multiplier);
            let mask: Vec<bool> = values.iter().map(|v| *v >= lower && *v <= upper).collect();
            if mask.iter().filter(|k| **k).count() < self.config.min_points {
                // never let filtering zero out the result
                vec![true; values.len()]
            } else {
                mask
            }
        } else {
            vec![true; values.len()]
        };

        let mut kept = Vec::with_capacity(values.len());
        let mut contributing_sources = Vec::new();
        let mut rejected_outliers = Vec::new();
        for (point, keep) in valid.iter().zip(&keep) {
            if *keep {
                kept.push(point.value);
                contributing_sources.push(point.source.clone());
            } else {
                rejected_outliers.push(point.source.clone());
            }
        }

        if !rejected_outliers.is_empty() {
            tracing::debug!(
                "Rejected outliers for {}: {:?}",
                instrument.id, rejected_outliers
            );
        }

        // Step 2: median and sample stdev of the same set
        let estimate = median(&kept);
        let dispersion = sample_stdev(&kept);

        // Step 3: secondary metrics over every valid point that reports them
        let mut secondary = BTreeMap::new();
        for metric in instrument.kind.secondary_metrics() {
            let samples: Vec<f64> = valid.iter()
                .filter_map(|p| p.value_of(*metric))
                .filter(|v| v.is_finite())
                .collect();
            if !samples.is_empty() {
                secondary.insert(*metric, MetricSummary {
                    median: median(&samples),
                    stdev: sample_stdev(&samples),
                    samples: samples.len(),
                });
            }
        }

        let oldest_observation = valid.iter()
            .zip(&keep)
            .filter(|(_, keep)| **keep)
            .map(|(p, _)| p.observed_at)
            .min()
            .unwrap_or(computed_at);

        Ok(ConsensusResult {
            instrument: instrument.id.clone(),
            metric,
            estimate,
            dispersion,
            valid_points: valid.len(),
            filtered_points: kept.len(),
            contributing_sources,
            rejected_outliers,
            secondary,
            oldest_observation,
            computed_at,
        })
    }
}

impl Default for ConsensusEngine {
    fn default() -> Self {
        ConsensusEngine::new(ConsensusConfig::default())
    }
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Median; the mean of the middle pair for even counts. NaN for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let sorted = sorted(values);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Sample (n - 1) standard deviation; zero below two values.
pub fn sample_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

/// Quantile by linear interpolation of the empirical CDF: the 1-based rank is
/// `n * p`, clamped to the first and last order statistics.
pub fn quantile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let h = n as f64 * p;
    if h <= 1.0 {
        return sorted[0];
    }
    if h >= n as f64 {
        return sorted[n - 1];
    }
    let lower = h.floor();
    let idx = lower as usize - 1;
    sorted[idx] + (h - lower) * (sorted[idx + 1] - sorted[idx])
}

/// `[Q1 - k*IQR, Q3 + k*IQR]`.
pub fn iqr_bounds(values: &[f64], multiplier: f64) -> (f64, f64) {
    let sorted = sorted(values);
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    (q1 - multiplier * iqr, q3 + multiplier * iqr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::data_point::{DataPoint, ValidationFailure, Verdict};
    use crate::types::instrument::InstrumentKind;

    fn btc() -> Instrument {
        Instrument::new("BTC", InstrumentKind::SpotPrice)
    }

    fn point(source: &str, value: f64) -> ValidatedPoint {
        ValidatedPoint {
            point: DataPoint::new(source, "BTC", Metric::Price, value, Timestamp::from_secs(1_000))
                .with_received_at(Timestamp::from_secs(1_000)),
            verdict: Verdict::default(),
        }
    }

    fn invalid(source: &str, value: f64) -> ValidatedPoint {
        let mut p = point(source, value);
        p.verdict.failures.push(ValidationFailure::NonPositive { metric: Metric::Price, value });
        p
    }

    fn compute(points: &[ValidatedPoint]) -> Result<ConsensusResult, Unavailable> {
        ConsensusEngine::default().compute(&btc(), points, Timestamp::from_secs(1_001))
    }

    #[test]
    fn three_agreeing_sources() {
        let result = compute(&[point("a", 100.0), point("b", 101.0), point("c", 99.5)]).unwrap();
        assert_eq!(result.estimate, 100.0);
        assert_eq!(result.filtered_points, 3);
        assert!(result.rejected_outliers.is_empty());
        // sample stdev of {99.5, 100, 101}
        assert!((result.dispersion - 0.763_762_615_825_973_3).abs() < 1e-9);
    }

    #[test]
    fn extreme_outlier_is_dropped() {
        let result = compute(&[point("a", 100.0), point("b", 101.0), point("c", 10_000.0)]).unwrap();
        assert_eq!(result.estimate, 100.5);
        assert_eq!(result.valid_points, 3);
        assert_eq!(result.filtered_points, 2);
        assert_eq!(result.rejected_outliers, vec![SourceId::from("c")]);
        assert_eq!(result.contributing_sources, vec![SourceId::from("a"), SourceId::from("b")]);
    }

    #[test]
    fn two_points_average_without_filtering() {
        let result = compute(&[point("a", 100.0), point("b", 300.0)]).unwrap();
        assert_eq!(result.estimate, 200.0);
        assert_eq!(result.filtered_points, 2);
    }

    #[test]
    fn fewer_than_two_valid_points_is_unavailable() {
        let none = compute(&[]).unwrap_err();
        assert_eq!(none.reason, UnavailableReason::NoUsablePoints);

        let one = compute(&[point("a", 100.0), invalid("b", -1.0)]).unwrap_err();
        assert_eq!(one.reason, UnavailableReason::InsufficientValidPoints);
        assert_eq!(one.valid_points, 1);
        assert_eq!(one.received_points, 2);
    }

    #[test]
    fn invalid_points_do_not_contribute() {
        let result = compute(&[point("a", 100.0), point("b", 102.0), invalid("c", 0.0)]).unwrap();
        assert_eq!(result.estimate, 101.0);
        assert_eq!(result.valid_points, 2);
    }

    #[test]
    fn filtering_never_leaves_fewer_than_two() {
        // with min_points raised, a filter leaving 3 of 4 falls back to all 4
        let engine = ConsensusEngine::new(ConsensusConfig {
            min_points: 4,
            ..ConsensusConfig::default()
        });
        let points = [point("a", 100.0), point("b", 100.0), point("c", 100.0), point("d", 1_000.0)];
        let result = engine.compute(&btc(), &points, Timestamp::from_secs(1_001)).unwrap();
        assert_eq!(result.filtered_points, 4);
        assert_eq!(result.estimate, 100.0);
    }

    #[test]
    fn identical_input_gives_identical_result() {
        let points = [point("a", 100.1), point("b", 100.7), point("c", 99.3), point("d", 140.0)];
        let first = compute(&points).unwrap();
        let second = compute(&points).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.estimate.to_bits(), second.estimate.to_bits());
        assert_eq!(first.dispersion.to_bits(), second.dispersion.to_bits());
    }

    #[test]
    fn pool_secondary_metrics_are_summarised() {
        let pool = Instrument::new("POOL", InstrumentKind::Pool);
        let make = |source: &str, tvl: f64, apy: Option<f64>| {
            let mut dp = DataPoint::new(source, "POOL", Metric::Tvl, tvl, Timestamp::from_secs(1_000));
            if let Some(apy) = apy {
                dp = dp.with_secondary(Metric::Apy, apy);
            }
            ValidatedPoint { point: dp, verdict: Verdict::default() }
        };
        let result = ConsensusEngine::default()
            .compute(&pool, &[make("x", 1.0e6, Some(12.0)), make("y", 1.1e6, None)], Timestamp::from_secs(1_001))
            .unwrap();
        assert_eq!(result.metric, Metric::Tvl);
        assert_eq!(result.estimate, 1.05e6);
        let apy = result.secondary[&Metric::Apy];
        assert_eq!(apy.median, 12.0);
        assert_eq!(apy.samples, 1);
        assert!(!result.secondary.contains_key(&Metric::Volume24h));
    }

    #[test]
    fn quantile_interpolates_on_rank() {
        let sorted = [100.0, 101.0, 10_000.0];
        assert_eq!(quantile(&sorted, 0.25), 100.0);
        assert_eq!(quantile(&sorted, 0.75), 101.0 + 0.25 * 9_899.0);
        assert_eq!(quantile(&[5.0], 0.75), 5.0);
    }
}
