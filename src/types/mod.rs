pub mod ids;
pub mod timestamp;
pub mod instrument;
pub mod data_point;

pub use ids::{InstrumentId, SourceId};
pub use instrument::{Instrument, InstrumentKind, Metric};
pub use data_point::{DataPoint, SanityFlag, ValidatedPoint, ValidationFailure, Verdict};
pub use timestamp::Timestamp;
