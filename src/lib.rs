pub mod aggregation;
pub mod config;
pub mod core;
pub mod error;
pub mod monitoring;
pub mod observability;
pub mod sources;
pub mod types;
pub mod utils;

pub use crate::core::{ConsensusOutcome, ConsensusReport, FeedEngine, SourceStatus};
pub use crate::error::{Error, FetchError, Result};
