pub mod alerts;
pub mod anomaly;
pub mod quality;
pub mod window;

pub use alerts::{Alert, AlertDetails, AlertKind, AlertSink, AlertSubject, AlertSummary, FeedStatus, Severity};
pub use anomaly::AnomalyDetector;
pub use quality::{QualityReport, QualityScorer};
