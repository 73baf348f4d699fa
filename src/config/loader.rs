use std::collections::HashSet;
use std::time::Duration;
use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::sources::SourceConfig;
use crate::types::instrument::Instrument;
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub sources: Vec<SourceConfig>,
    pub instruments: Vec<Instrument>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig { interval_secs: 30 }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("FEEDINFRA").separator("__"))
            .build()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        let app: AppConfig = config.try_deserialize()
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let app: AppConfig = toml::from_str(raw)
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<()> {
        self.feed.validate()?;

        if self.poll.interval_secs == 0 {
            return Err(Error::ConfigError("poll.interval_secs must be positive".into()));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id.clone()) {
                return Err(Error::DuplicateSource(source.id.clone()));
            }
        }

        let mut instruments = HashSet::new();
        for instrument in &self.instruments {
            if !instruments.insert(instrument.id.clone()) {
                return Err(Error::ConfigError(format!("duplicate instrument {}", instrument.id)));
            }
            for source in instrument.symbols.keys() {
                if !seen.contains(source) {
                    tracing::warn!(
                        "Instrument {} maps unknown source {}, it will be ignored",
                        instrument.id, source
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::ProviderKind;
    use crate::types::instrument::InstrumentKind;

    const SAMPLE: &str = r#"
        [poll]
        interval_secs = 15

        [feed.health]
        failure_threshold = 5

        [feed.anomaly.volatility]
        warning = 0.05
        critical = 0.15

        [[sources]]
        id = "binance"
        provider = "binance"

        [[sources]]
        id = "coingecko"
        provider = "coingecko"
        timeout_ms = 3000

        [[instruments]]
        id = "BTC"
        kind = "spot_price"
        symbols = { binance = "BTCUSDT", coingecko = "bitcoin" }
    "#;

    #[test]
    fn parses_sources_instruments_and_overrides() {
        let app = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(app.poll.interval_secs, 15);
        assert_eq!(app.feed.health.failure_threshold, 5);
        assert_eq!(app.feed.anomaly.volatility.warning, 0.05);
        // untouched sections keep their defaults
        assert_eq!(app.feed.consensus.iqr_multiplier, 1.5);
        assert_eq!(app.sources.len(), 2);
        assert_eq!(app.sources[1].provider, ProviderKind::CoinGecko);
        assert_eq!(app.sources[1].timeout_ms, Some(3000));
        assert_eq!(app.instruments[0].kind, InstrumentKind::SpotPrice);
        assert_eq!(app.instruments[0].symbol_for(&"coingecko".into()), Some("bitcoin"));
    }

    #[test]
    fn duplicate_source_ids_are_rejected() {
        let raw = r#"
            instruments = []

            [[sources]]
            id = "binance"
            provider = "binance"

            [[sources]]
            id = "binance"
            provider = "bybit"
        "#;
        assert!(matches!(AppConfig::from_toml_str(raw), Err(Error::DuplicateSource(_))));
    }

    #[test]
    fn checked_in_default_config_is_valid() {
        let raw = include_str!("../../config/default.toml");
        let app = AppConfig::from_toml_str(raw).unwrap();
        assert!(!app.sources.is_empty());
        assert!(!app.instruments.is_empty());
    }
}
