pub mod connectors;
pub mod health;
pub mod managed;
pub mod registry;
pub mod retry;

use serde::{Deserialize, Serialize};
use crate::types::ids::SourceId;

pub use connectors::SourceAdapter;
pub use health::{SourceHealth, SourceState};
pub use managed::ManagedSource;
pub use registry::SourceRegistry;
pub use retry::RetryPolicy;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    CoinGecko,
    DefiLlama,
    Binance,
    Bybit,
    GeckoTerminal,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SourceConfig {
    pub id: SourceId,
    pub provider: ProviderKind,
    /// Overrides the provider's public endpoint (tests, proxies).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Per-attempt timeout; falls back to `feed.fetch.attempt_timeout_ms`.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    pub fn new(id: impl Into<SourceId>, provider: ProviderKind) -> Self {
        SourceConfig {
            id: id.into(),
            provider,
            base_url: None,
            timeout_ms: None,
            enabled: true,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}
