//! Composite [0, 1] quality score for a delivered consensus.
//!
//! Three sub-scores are combined with fixed weights (by default freshness
//! 0.4, availability 0.3, consistency 0.3). Every function here is pure.

use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::config::QualityConfig;
use crate::types::instrument::InstrumentKind;
use crate::utils::helper::round3;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub score: f64,
    pub freshness: f64,
    pub availability: f64,
    pub consistency: f64,
    /// Whether `score` reaches the configured minimum.
    pub acceptable: bool,
}

impl QualityReport {
    pub fn rounded(&self) -> QualityReport {
        QualityReport {
            score: round3(self.score),
            freshness: round3(self.freshness),
            availability: round3(self.availability),
            consistency: round3(self.consistency),
            acceptable: self.acceptable,
        }
    }
}

#[derive(Clone, Debug)]
pub struct QualityScorer {
    config: QualityConfig,
}

impl QualityScorer {
    pub fn new(config: QualityConfig) -> Self {
        QualityScorer { config }
    }

    /// 1.0 up to `fresh_within`, linear decay to 0.0 at `stale_after`.
    pub fn freshness(&self, age: Duration) -> f64 {
        let age = age.as_secs_f64();
        let fresh = self.config.fresh_within_secs as f64;
        let stale = self.config.stale_after_secs as f64;

        if age <= fresh {
            1.0
        } else if age >= stale {
            0.0
        } else {
            (1.0 - (age - fresh) / (stale - fresh)).clamp(0.0, 1.0)
        }
    }

    pub fn availability(&self, available: usize, total: usize) -> f64 {
        if total == 0 {
            return 0.0;
        }
        (available as f64 / total as f64).clamp(0.0, 1.0)
    }

    /// `1 - cv / tolerance`, clamped. Estimates of zero carry no scale and
    /// score zero. Funding rates compare the raw stdev against an absolute
    /// tolerance instead.
    pub fn consistency(&self, kind: InstrumentKind, stdev: f64, estimate: f64) -> f64 {
        if !estimate.is_finite() || !stdev.is_finite() {
            return 0.0;
        }
        if kind == InstrumentKind::FundingRate {
            return (1.0 - stdev.abs() / self.config.funding_rate_stdev_tolerance).clamp(0.0, 1.0);
        }
        if estimate == 0.0 {
            return 0.0;
        }
        let cv = stdev.abs() / estimate.abs();
        (1.0 - cv / self.config.cv_tolerance).clamp(0.0, 1.0)
    }

    pub fn overall(&self, freshness: f64, availability: f64, consistency: f64) -> f64 {
        let score = freshness * self.config.freshness_weight
            + availability * self.config.availability_weight
            + consistency * self.config.consistency_weight;
        score.clamp(0.0, 1.0)
    }

    pub fn score(
        &self,
        kind: InstrumentKind,
        age: Duration,
        available: usize,
        total: usize,
        stdev: f64,
        estimate: f64,
    ) -> QualityReport {
        let freshness = self.freshness(age);
        let availability = self.availability(available, total);
        let consistency = self.consistency(kind, stdev, estimate);
        let score = self.overall(freshness, availability, consistency);

        QualityReport {
            score,
            freshness,
            availability,
            consistency,
            acceptable: score >= self.config.min_score,
        }
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        QualityScorer::new(QualityConfig::default())
    }
}
