pub mod engine;
pub mod report;

pub use engine::FeedEngine;
pub use report::{ConsensusOutcome, ConsensusReport, SourceStatus};
