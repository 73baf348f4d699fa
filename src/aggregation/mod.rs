pub mod consensus;
pub mod orchestrator;
pub mod validator;

pub use consensus::{ConsensusEngine, ConsensusResult, MetricSummary, Unavailable, UnavailableReason};
pub use orchestrator::{FetchOrchestrator, RoundOutcome, SourceFailure};
pub use validator::Validator;
