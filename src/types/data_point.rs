use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use crate::types::ids::{InstrumentId, SourceId};
use crate::types::instrument::Metric;
use crate::types::timestamp::Timestamp;

/// One source's report for one instrument. Never mutated after construction;
/// validation outcomes live in [`Verdict`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub source: SourceId,
    pub instrument: InstrumentId,
    pub metric: Metric,
    pub value: f64,
    pub secondary: BTreeMap<Metric, f64>,
    /// When the provider says the value was observed.
    pub observed_at: Timestamp,
    pub received_at: Timestamp,
}

impl DataPoint {
    pub fn new(
        source: impl Into<SourceId>,
        instrument: impl Into<InstrumentId>,
        metric: Metric,
        value: f64,
        observed_at: Timestamp,
    ) -> Self {
        DataPoint {
            source: source.into(),
            instrument: instrument.into(),
            metric,
            value,
            secondary: BTreeMap::new(),
            observed_at,
            received_at: Timestamp::now(),
        }
    }

    pub fn with_secondary(mut self, metric: Metric, value: f64) -> Self {
        self.secondary.insert(metric, value);
        self
    }

    pub fn with_received_at(mut self, received_at: Timestamp) -> Self {
        self.received_at = received_at;
        self
    }

    /// Primary value for the instrument's own metric, otherwise a secondary one.
    pub fn value_of(&self, metric: Metric) -> Option<f64> {
        if metric == self.metric {
            Some(self.value)
        } else {
            self.secondary.get(&metric).copied()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ValidationFailure {
    Stale { metric: Metric, age_ms: u64, max_ms: u64 },
    NonPositive { metric: Metric, value: f64 },
    Negative { metric: Metric, value: f64 },
    Malformed { detail: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum SanityFlag {
    AboveSoftCeiling { metric: Metric, value: f64, ceiling: f64 },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub failures: Vec<ValidationFailure>,
    pub flags: Vec<SanityFlag>,
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidatedPoint {
    pub point: DataPoint,
    pub verdict: Verdict,
}

impl ValidatedPoint {
    pub fn is_valid(&self) -> bool {
        self.verdict.is_valid()
    }
}
