use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::config::AlertConfig;
use crate::monitoring::window::RollingWindow;
use crate::observability::metrics;
use crate::types::ids::{InstrumentId, SourceId};
use crate::types::timestamp::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Volatility,
    Divergence,
    Delay,
    SystemFailure,
    TvlDrop,
    ApyOutOfRange,
    LowLiquidity,
    LowVolumeRatio,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Volatility => "volatility",
            AlertKind::Divergence => "divergence",
            AlertKind::Delay => "delay",
            AlertKind::SystemFailure => "system_failure",
            AlertKind::TvlDrop => "tvl_drop",
            AlertKind::ApyOutOfRange => "apy_out_of_range",
            AlertKind::LowLiquidity => "low_liquidity",
            AlertKind::LowVolumeRatio => "low_volume_ratio",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AlertSubject {
    Instrument(InstrumentId),
    Source(SourceId),
    Feed,
}

impl fmt::Display for AlertSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSubject::Instrument(id) => write!(f, "instrument {}", id),
            AlertSubject::Source(id) => write!(f, "source {}", id),
            AlertSubject::Feed => f.write_str("feed"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceDeviation {
    pub source: SourceId,
    pub value: f64,
    pub deviation: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertDetails {
    Volatility { previous: f64, current: f64, change: f64 },
    Divergence { estimate: f64, divergent: Vec<SourceDeviation>, considered: usize },
    Delay { delay_secs: u64, max_delay_secs: u64 },
    SystemFailure { unavailable: usize, total: usize },
    TvlDrop { previous: f64, current: f64, drop: f64 },
    ApyOutOfRange { apy: f64, min: f64, max: f64 },
    LowLiquidity { tvl: f64, min_tvl: f64 },
    LowVolumeRatio { ratio: f64, min_ratio: f64 },
}

impl AlertDetails {
    pub fn kind(&self) -> AlertKind {
        match self {
            AlertDetails::Volatility { .. } => AlertKind::Volatility,
            AlertDetails::Divergence { .. } => AlertKind::Divergence,
            AlertDetails::Delay { .. } => AlertKind::Delay,
            AlertDetails::SystemFailure { .. } => AlertKind::SystemFailure,
            AlertDetails::TvlDrop { .. } => AlertKind::TvlDrop,
            AlertDetails::ApyOutOfRange { .. } => AlertKind::ApyOutOfRange,
            AlertDetails::LowLiquidity { .. } => AlertKind::LowLiquidity,
            AlertDetails::LowVolumeRatio { .. } => AlertKind::LowVolumeRatio,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub subject: AlertSubject,
    pub severity: Severity,
    pub raised_at: Timestamp,
    pub details: AlertDetails,
}

impl Alert {
    pub fn new(subject: AlertSubject, severity: Severity, raised_at: Timestamp, details: AlertDetails) -> Self {
        Alert {
            id: Uuid::new_v4(),
            subject,
            severity,
            raised_at,
            details,
        }
    }

    pub fn kind(&self) -> AlertKind {
        self.details.kind()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub status: FeedStatus,
    pub total: usize,
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
    pub system_failure: bool,
}

/// Bounded, time-pruned log of raised alerts.
pub struct AlertSink {
    retention: Duration,
    repeat_window: Duration,
    entries: Mutex<RollingWindow<Alert>>,
}

impl AlertSink {
    pub fn new(config: &AlertConfig) -> Self {
        AlertSink {
            retention: config.retention(),
            repeat_window: config.repeat_window(),
            entries: Mutex::new(RollingWindow::new(config.retention(), config.capacity)),
        }
    }

    /// Stores `alert` unless an alert with the same subject, kind and
    /// severity was stored within the repeat window before it. Returns
    /// whether it was stored.
    pub fn append(&self, alert: Alert) -> bool {
        let raised_at = alert.raised_at;
        let mut entries = self.lock();
        if !self.repeat_window.is_zero() {
            let cutoff = raised_at.saturating_sub(self.repeat_window);
            let repeated = entries.since(cutoff).any(|(at, stored)| {
                *at <= raised_at
                    && stored.subject == alert.subject
                    && stored.severity == alert.severity
                    && stored.kind() == alert.kind()
            });
            if repeated {
                tracing::debug!("Suppressing repeated {} alert for {}", alert.kind().as_str(), alert.subject);
                return false;
            }
        }

        match alert.severity {
            Severity::Critical => tracing::error!(
                "CRITICAL ALERT [{}] {}: {:?}", alert.kind().as_str(), alert.subject, alert.details
            ),
            Severity::Warning => tracing::warn!(
                "WARNING ALERT [{}] {}: {:?}", alert.kind().as_str(), alert.subject, alert.details
            ),
            Severity::Info => tracing::info!(
                "INFO ALERT [{}] {}: {:?}", alert.kind().as_str(), alert.subject, alert.details
            ),
        }
        metrics::ALERTS_RAISED
            .with_label_values(&[alert.kind().as_str(), alert.severity.as_str()])
            .inc();

        entries.push(raised_at, alert);
        true
    }

    pub fn query(&self, window: Duration) -> Vec<Alert> {
        self.query_at(window, Timestamp::now())
    }

    /// Alerts raised within `window` of `now`, never older than the retention.
    pub fn query_at(&self, window: Duration, now: Timestamp) -> Vec<Alert> {
        let cutoff = now.saturating_sub(window.min(self.retention));
        self.lock()
            .since(cutoff)
            .map(|(_, alert)| alert.clone())
            .collect()
    }

    pub fn prune(&self, max_age: Duration) {
        self.prune_at(max_age, Timestamp::now());
    }

    pub fn prune_at(&self, max_age: Duration, now: Timestamp) {
        self.lock().prune_older_than(now, max_age);
    }

    pub fn summary_at(&self, window: Duration, now: Timestamp) -> AlertSummary {
        let recent = self.query_at(window, now);
        let count = |severity| recent.iter().filter(|a| a.severity == severity).count();
        let critical = count(Severity::Critical);
        let warning = count(Severity::Warning);
        let info = count(Severity::Info);

        let status = if critical > 0 {
            FeedStatus::Critical
        } else if warning > 0 {
            FeedStatus::Warning
        } else {
            FeedStatus::Healthy
        };

        AlertSummary {
            status,
            total: recent.len(),
            critical,
            warning,
            info,
            system_failure: recent.iter().any(|a| a.kind() == AlertKind::SystemFailure),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RollingWindow<Alert>> {
        // a panic mid-push leaves the buffer usable
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
