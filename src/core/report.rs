use serde::Serialize;
use crate::aggregation::consensus::{ConsensusResult, Unavailable};
use crate::aggregation::orchestrator::SourceFailure;
use crate::monitoring::alerts::Alert;
use crate::monitoring::quality::QualityReport;
use crate::types::data_point::ValidatedPoint;
use crate::types::ids::SourceId;

pub use crate::sources::health::SourceState as SourceStatus;

/// A delivered consensus with the provenance of the round that produced it.
#[derive(Clone, Debug, Serialize)]
pub struct ConsensusReport {
    pub round_id: u64,
    pub result: ConsensusResult,
    pub quality: QualityReport,
    /// Every point the round received, valid or not.
    pub points: Vec<ValidatedPoint>,
    pub failures: Vec<SourceFailure>,
    pub timed_out: Vec<SourceId>,
    /// Alerts raised while evaluating this round.
    pub alerts: Vec<Alert>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConsensusOutcome {
    Available(Box<ConsensusReport>),
    Unavailable(Unavailable),
}

impl ConsensusOutcome {
    pub fn is_available(&self) -> bool {
        matches!(self, ConsensusOutcome::Available(_))
    }

    pub fn estimate(&self) -> Option<f64> {
        self.report().map(|r| r.result.estimate)
    }

    pub fn report(&self) -> Option<&ConsensusReport> {
        match self {
            ConsensusOutcome::Available(report) => Some(report),
            ConsensusOutcome::Unavailable(_) => None,
        }
    }

    pub fn unavailable(&self) -> Option<&Unavailable> {
        match self {
            ConsensusOutcome::Available(_) => None,
            ConsensusOutcome::Unavailable(u) => Some(u),
        }
    }
}
