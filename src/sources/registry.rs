use std::sync::Arc;
use std::time::Duration;
use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::sources::connectors::{build_adapter, SourceAdapter};
use crate::sources::health::SourceState;
use crate::sources::managed::ManagedSource;
use crate::sources::retry::RetryPolicy;
use crate::sources::SourceConfig;
use crate::types::ids::SourceId;
use crate::types::instrument::Instrument;

/// Every configured source, in registration order. Built once at startup and
/// shared by handle.
pub struct SourceRegistry {
    sources: Vec<Arc<ManagedSource>>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    failure_threshold: u32,
}

impl SourceRegistry {
    pub fn new(config: &FeedConfig) -> Self {
        SourceRegistry {
            sources: Vec::new(),
            retry: RetryPolicy::from_config(&config.fetch.retry),
            attempt_timeout: config.fetch.attempt_timeout(),
            failure_threshold: config.health.failure_threshold,
        }
    }

    pub fn from_configs(
        config: &FeedConfig,
        sources: &[SourceConfig],
        client: reqwest::Client,
    ) -> Result<Self> {
        let mut registry = SourceRegistry::new(config);
        for source in sources {
            if !source.enabled {
                tracing::info!("Source {} disabled, skipping", source.id);
                continue;
            }
            let adapter = build_adapter(source, client.clone());
            let timeout = source.timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(registry.attempt_timeout);
            registry.register_with_timeout(adapter, timeout)?;
        }
        tracing::info!("Registered {} sources", registry.len());
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> Result<()> {
        let timeout = self.attempt_timeout;
        self.register_with_timeout(adapter, timeout)
    }

    pub fn register_with_timeout(&mut self, adapter: Arc<dyn SourceAdapter>, attempt_timeout: Duration) -> Result<()> {
        let id = adapter.source_id();
        if self.get(&id).is_some() {
            return Err(Error::DuplicateSource(id));
        }
        self.sources.push(Arc::new(ManagedSource::new(
            adapter,
            self.retry.clone(),
            attempt_timeout,
            self.failure_threshold,
        )));
        Ok(())
    }

    pub fn get(&self, id: &SourceId) -> Option<&Arc<ManagedSource>> {
        self.sources.iter().find(|s| &s.id() == id)
    }

    pub fn sources(&self) -> &[Arc<ManagedSource>] {
        &self.sources
    }

    pub fn supporting(&self, instrument: &Instrument) -> Vec<Arc<ManagedSource>> {
        self.sources.iter()
            .filter(|s| s.supports(instrument))
            .cloned()
            .collect()
    }

    /// (available, total) among the sources that serve `instrument`.
    pub fn availability_for(&self, instrument: &Instrument) -> (usize, usize) {
        let supporting = self.supporting(instrument);
        let available = supporting.iter().filter(|s| s.health().is_available()).count();
        (available, supporting.len())
    }

    pub fn statuses(&self) -> Vec<SourceState> {
        self.sources.iter().map(|s| s.status()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::connectors::scripted::{Scripted, ScriptedSource};
    use crate::sources::ProviderKind;
    use crate::types::instrument::InstrumentKind;

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = SourceRegistry::new(&FeedConfig::default());
        registry.register(Arc::new(ScriptedSource::new("a"))).unwrap();
        let err = registry.register(Arc::new(ScriptedSource::new("a"))).unwrap_err();
        assert!(matches!(err, Error::DuplicateSource(_)));
    }

    #[test]
    fn disabled_sources_are_skipped() {
        let mut disabled = SourceConfig::new("bybit", ProviderKind::Bybit);
        disabled.enabled = false;
        let configs = vec![SourceConfig::new("binance", ProviderKind::Binance), disabled];
        let registry = SourceRegistry::from_configs(&FeedConfig::default(), &configs, reqwest::Client::new()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&"bybit".into()).is_none());
    }

    #[test]
    fn supporting_filters_by_adapter() {
        let mut registry = SourceRegistry::new(&FeedConfig::default());
        registry.register(Arc::new(ScriptedSource::new("a").with_response("BTC", Scripted::Value(1.0)))).unwrap();
        registry.register(Arc::new(ScriptedSource::new("b").with_response("ETH", Scripted::Value(1.0)))).unwrap();

        let btc = Instrument::new("BTC", InstrumentKind::SpotPrice);
        let ids: Vec<_> = registry.supporting(&btc).iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![SourceId::from("a")]);
        assert_eq!(registry.availability_for(&btc), (1, 1));
        assert_eq!(registry.statuses().len(), 2);
    }
}
