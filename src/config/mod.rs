use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::monitoring::alerts::Severity;
use crate::types::instrument::{InstrumentKind, Metric};

pub mod loader;

/// Every tunable of the fetch/consensus/monitoring pipeline in one place.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedConfig {
    pub fetch: FetchConfig,
    pub staleness: StalenessConfig,
    pub sanity: SanityConfig,
    pub consensus: ConsensusConfig,
    pub anomaly: AnomalyConfig,
    pub health: SourceHealthConfig,
    pub alerts: AlertConfig,
    pub quality: QualityConfig,
}

impl FeedConfig {
    pub fn validate(&self) -> Result<()> {
        let fetch = &self.fetch;
        if fetch.attempt_timeout_ms == 0 {
            return Err(Error::ConfigError("fetch.attempt_timeout_ms must be positive".into()));
        }
        if fetch.adapter_budget_ms < fetch.attempt_timeout_ms {
            return Err(Error::ConfigError(
                "fetch.adapter_budget_ms must cover at least one attempt".into(),
            ));
        }
        if fetch.round_margin_ms == 0 {
            return Err(Error::ConfigError("fetch.round_margin_ms must be positive".into()));
        }
        if fetch.retry.max_attempts == 0 {
            return Err(Error::ConfigError("fetch.retry.max_attempts must be at least 1".into()));
        }
        if self.consensus.min_points < 2 {
            return Err(Error::ConfigError("consensus.min_points must be at least 2".into()));
        }
        if self.consensus.iqr_min_points < 3 {
            return Err(Error::ConfigError("consensus.iqr_min_points must be at least 3".into()));
        }
        if self.consensus.iqr_multiplier <= 0.0 {
            return Err(Error::ConfigError("consensus.iqr_multiplier must be positive".into()));
        }
        if self.health.failure_threshold == 0 {
            return Err(Error::ConfigError("health.failure_threshold must be at least 1".into()));
        }
        self.anomaly.volatility.validate("anomaly.volatility")?;
        self.anomaly.funding_rate.volatility.validate("anomaly.funding_rate.volatility")?;
        if self.anomaly.funding_rate.divergence <= 0.0 {
            return Err(Error::ConfigError("anomaly.funding_rate.divergence must be positive".into()));
        }
        if self.quality.cv_tolerance <= 0.0 || self.quality.funding_rate_stdev_tolerance <= 0.0 {
            return Err(Error::ConfigError("quality consistency tolerances must be positive".into()));
        }
        self.anomaly.pool.tvl_drop.validate("anomaly.pool.tvl_drop")?;
        if self.anomaly.delay.critical_secs < self.anomaly.delay.warning_secs {
            return Err(Error::ConfigError(
                "anomaly.delay.critical_secs must not be below warning_secs".into(),
            ));
        }
        if self.quality.stale_after_secs <= self.quality.fresh_within_secs {
            return Err(Error::ConfigError(
                "quality.stale_after_secs must exceed fresh_within_secs".into(),
            ));
        }
        let weights = self.quality.freshness_weight
            + self.quality.availability_weight
            + self.quality.consistency_weight;
        if (weights - 1.0).abs() > 1e-6 {
            return Err(Error::ConfigError(format!("quality weights sum to {}, expected 1", weights)));
        }
        if self.alerts.capacity == 0 {
            return Err(Error::ConfigError("alerts.capacity must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Upper bound for one HTTP attempt.
    pub attempt_timeout_ms: u64,
    /// Absolute budget per adapter per round, retries included.
    pub adapter_budget_ms: u64,
    /// How long the round waits past the adapter budget before closing.
    pub round_margin_ms: u64,
    pub retry: RetryConfig,
}

impl FetchConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn adapter_budget(&self) -> Duration {
        Duration::from_millis(self.adapter_budget_ms)
    }

    pub fn round_deadline(&self) -> Duration {
        Duration::from_millis(self.adapter_budget_ms + self.round_margin_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            attempt_timeout_ms: 5_000,
            adapter_budget_ms: 12_000,
            round_margin_ms: 2_000,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after every attempt.
    pub base_delay_ms: u64,
    /// An attempt is not started with less than this much budget left.
    pub min_attempt_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1_000,
            min_attempt_ms: 250,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StalenessConfig {
    pub spot_price_secs: u64,
    pub funding_rate_secs: u64,
    pub pool_secs: u64,
    /// Observations stamped further than this in the future are malformed.
    pub future_skew_secs: u64,
}

impl StalenessConfig {
    pub fn max_age(&self, kind: InstrumentKind) -> Duration {
        let secs = match kind {
            InstrumentKind::SpotPrice => self.spot_price_secs,
            InstrumentKind::FundingRate => self.funding_rate_secs,
            InstrumentKind::Pool => self.pool_secs,
        };
        Duration::from_secs(secs)
    }
}

impl Default for StalenessConfig {
    fn default() -> Self {
        StalenessConfig {
            spot_price_secs: 60,
            funding_rate_secs: 300,
            pool_secs: 300,
            future_skew_secs: 5,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SanityConfig {
    pub price_ceiling: f64,
    pub funding_rate_ceiling: f64,
    pub tvl_ceiling: f64,
    pub apy_ceiling: f64,
    pub volume_ceiling: f64,
}

impl SanityConfig {
    pub fn ceiling(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Price => self.price_ceiling,
            Metric::FundingRate => self.funding_rate_ceiling,
            Metric::Tvl => self.tvl_ceiling,
            Metric::Apy => self.apy_ceiling,
            Metric::Volume24h => self.volume_ceiling,
        }
    }
}

impl Default for SanityConfig {
    fn default() -> Self {
        SanityConfig {
            price_ceiling: 1_000_000.0,
            funding_rate_ceiling: 0.05,   // 5% per interval
            tvl_ceiling: 1e12,
            apy_ceiling: 10_000.0,        // percent
            volume_ceiling: 1e12,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub min_points: usize,
    pub iqr_min_points: usize,
    pub iqr_multiplier: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            min_points: 2,
            iqr_min_points: 3,
            iqr_multiplier: 1.5,
        }
    }
}

/// Two-tier threshold on a ratio: above `warning` warns, above `critical` is critical.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct TieredThreshold {
    pub warning: f64,
    pub critical: f64,
}

impl TieredThreshold {
    pub fn new(warning: f64, critical: f64) -> Self {
        TieredThreshold { warning, critical }
    }

    pub fn classify(&self, value: f64) -> Option<Severity> {
        if value > self.critical {
            Some(Severity::Critical)
        } else if value > self.warning {
            Some(Severity::Warning)
        } else {
            None
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.warning < 0.0 || self.critical < self.warning {
            return Err(Error::ConfigError(format!(
                "{}: expected 0 <= warning <= critical, got {} / {}",
                name, self.warning, self.critical
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub volatility: TieredThreshold,
    pub divergence: DivergenceConfig,
    pub delay: DelayConfig,
    /// Share of unavailable sources above which the whole feed is failed.
    pub system_failure_fraction: f64,
    pub history_window_secs: u64,
    pub history_capacity: usize,
    pub pool: PoolCheckConfig,
    pub funding_rate: FundingRateCheckConfig,
}

impl AnomalyConfig {
    pub fn history_window(&self) -> Duration {
        Duration::from_secs(self.history_window_secs)
    }

    /// Tiers applied to the round-over-round change of this kind.
    pub fn volatility_for(&self, kind: InstrumentKind) -> &TieredThreshold {
        match kind {
            InstrumentKind::FundingRate => &self.funding_rate.volatility,
            _ => &self.volatility,
        }
    }

    /// Distance from the estimate above which a source counts as divergent.
    pub fn divergence_for(&self, kind: InstrumentKind) -> f64 {
        match kind {
            InstrumentKind::FundingRate => self.funding_rate.divergence,
            _ => self.divergence.deviation,
        }
    }
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        AnomalyConfig {
            volatility: TieredThreshold::new(0.10, 0.20),
            divergence: DivergenceConfig::default(),
            delay: DelayConfig::default(),
            system_failure_fraction: 2.0 / 3.0,
            history_window_secs: 3_600,
            history_capacity: 100,
            pool: PoolCheckConfig::default(),
            funding_rate: FundingRateCheckConfig::default(),
        }
    }
}

/// Funding rates sit around zero, so their volatility and divergence
/// thresholds are absolute differences in the rate, not ratios.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct FundingRateCheckConfig {
    pub volatility: TieredThreshold,
    pub divergence: f64,
}

impl Default for FundingRateCheckConfig {
    fn default() -> Self {
        FundingRateCheckConfig {
            volatility: TieredThreshold::new(0.0005, 0.001), // 5bp / 10bp
            divergence: 0.0002,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DivergenceConfig {
    /// Relative deviation from the estimate that counts a source as divergent.
    pub deviation: f64,
    /// Share of divergent sources that raises an alert.
    pub min_fraction: f64,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        DivergenceConfig {
            deviation: 0.05,
            min_fraction: 1.0 / 3.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DelayConfig {
    pub warning_secs: u64,
    pub critical_secs: u64,
}

impl DelayConfig {
    pub fn classify(&self, delay: Duration) -> Option<Severity> {
        if delay > Duration::from_secs(self.critical_secs) {
            Some(Severity::Critical)
        } else if delay > Duration::from_secs(self.warning_secs) {
            Some(Severity::Warning)
        } else {
            None
        }
    }
}

impl Default for DelayConfig {
    fn default() -> Self {
        DelayConfig {
            warning_secs: 120,
            critical_secs: 240,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolCheckConfig {
    pub tvl_drop: TieredThreshold,
    pub min_apy: f64,
    pub max_apy: f64,
    pub min_tvl: f64,
    pub min_volume_tvl_ratio: f64,
}

impl Default for PoolCheckConfig {
    fn default() -> Self {
        PoolCheckConfig {
            tvl_drop: TieredThreshold::new(0.20, 0.50),
            min_apy: 1.0,
            max_apy: 1_000.0,
            min_tvl: 100_000.0,
            min_volume_tvl_ratio: 0.01,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceHealthConfig {
    /// Consecutive failed fetches before a source is marked unavailable.
    pub failure_threshold: u32,
}

impl Default for SourceHealthConfig {
    fn default() -> Self {
        SourceHealthConfig { failure_threshold: 3 }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertConfig {
    pub retention_secs: u64,
    pub capacity: usize,
    pub summary_window_secs: u64,
    /// An alert with the same subject, kind and severity as one raised
    /// within this many seconds is not stored again. 0 stores every alert.
    pub repeat_window_secs: u64,
}

impl AlertConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn repeat_window(&self) -> Duration {
        Duration::from_secs(self.repeat_window_secs)
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        AlertConfig {
            retention_secs: 3_600,
            capacity: 1_000,
            summary_window_secs: 300,
            repeat_window_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct QualityConfig {
    pub fresh_within_secs: u64,
    pub stale_after_secs: u64,
    /// Coefficient of variation at which consistency reaches zero.
    pub cv_tolerance: f64,
    /// Absolute stdev at which a funding rate round's consistency reaches zero.
    pub funding_rate_stdev_tolerance: f64,
    pub freshness_weight: f64,
    pub availability_weight: f64,
    pub consistency_weight: f64,
    pub min_score: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        QualityConfig {
            fresh_within_secs: 60,
            stale_after_secs: 300,
            cv_tolerance: 0.01,
            funding_rate_stdev_tolerance: 0.0001,
            freshness_weight: 0.4,
            availability_weight: 0.3,
            consistency_weight: 0.3,
            min_score: 0.6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        FeedConfig::default().validate().unwrap();
    }

    #[test]
    fn round_deadline_exceeds_adapter_budget() {
        let fetch = FetchConfig::default();
        assert!(fetch.round_deadline() > fetch.adapter_budget());
        assert!(fetch.adapter_budget() >= fetch.attempt_timeout());
    }

    #[test]
    fn funding_rates_use_absolute_thresholds() {
        let anomaly = AnomalyConfig::default();
        assert_eq!(anomaly.volatility_for(InstrumentKind::SpotPrice), &anomaly.volatility);
        assert_eq!(anomaly.volatility_for(InstrumentKind::FundingRate).critical, 0.001);
        assert_eq!(anomaly.divergence_for(InstrumentKind::Pool), 0.05);
        assert_eq!(anomaly.divergence_for(InstrumentKind::FundingRate), 0.0002);

        let mut config = FeedConfig::default();
        config.anomaly.funding_rate.volatility = TieredThreshold::new(0.002, 0.001);
        assert!(config.validate().is_err());
    }

    #[test]
    fn tiered_threshold_is_strict() {
        let tiers = TieredThreshold::new(0.10, 0.20);
        assert_eq!(tiers.classify(0.10), None);
        assert_eq!(tiers.classify(0.15), Some(Severity::Warning));
        assert_eq!(tiers.classify(0.20), Some(Severity::Warning));
        assert_eq!(tiers.classify(0.25), Some(Severity::Critical));
    }

    #[test]
    fn inverted_tiers_are_rejected() {
        let mut config = FeedConfig::default();
        config.anomaly.volatility = TieredThreshold::new(0.3, 0.2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn weights_must_sum_to_one() {
        let mut config = FeedConfig::default();
        config.quality.freshness_weight = 0.5;
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn delay_tiers() {
        let delay = DelayConfig::default();
        assert_eq!(delay.classify(Duration::from_secs(100)), None);
        assert_eq!(delay.classify(Duration::from_secs(200)), Some(Severity::Warning));
        assert_eq!(delay.classify(Duration::from_secs(400)), Some(Severity::Critical));
    }
}
