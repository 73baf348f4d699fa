pub mod binance;
pub mod bybit;
pub mod coingecko;
pub mod defillama;
pub mod geckoterminal;
pub mod scripted;

use std::sync::Arc;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use crate::error::{Error, FetchError, Result};
use crate::sources::{ProviderKind, SourceConfig};
use crate::types::data_point::DataPoint;
use crate::types::ids::SourceId;
use crate::types::instrument::{Instrument, InstrumentKind};

/// One external provider. A single `fetch` is one attempt: retries, timeouts
/// and health bookkeeping belong to [`crate::sources::ManagedSource`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> SourceId;
    fn supports(&self, instrument: &Instrument) -> bool;
    async fn fetch(&self, instrument: &Instrument) -> std::result::Result<DataPoint, FetchError>;
}

pub fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("feed-infra/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::HttpClientError(e.to_string()))
}

pub fn build_adapter(config: &SourceConfig, client: reqwest::Client) -> Arc<dyn SourceAdapter> {
    let id = config.id.clone();
    let base = config.base_url.clone();
    match config.provider {
        ProviderKind::CoinGecko => Arc::new(coingecko::CoinGeckoConnector::new(id, base, client)),
        ProviderKind::DefiLlama => Arc::new(defillama::DefiLlamaConnector::new(id, base, client)),
        ProviderKind::Binance => Arc::new(binance::BinanceConnector::new(id, base, client)),
        ProviderKind::Bybit => Arc::new(bybit::BybitConnector::new(id, base, client)),
        ProviderKind::GeckoTerminal => Arc::new(geckoterminal::GeckoTerminalConnector::new(id, base, client)),
    }
}

/// True when `kind` is one this connector serves and the instrument maps a
/// symbol for it.
pub(crate) fn serves(source: &SourceId, kinds: &[InstrumentKind], instrument: &Instrument) -> bool {
    kinds.contains(&instrument.kind) && instrument.symbol_for(source).is_some()
}

pub(crate) fn symbol<'a>(source: &SourceId, instrument: &'a Instrument) -> std::result::Result<&'a str, FetchError> {
    instrument.symbol_for(source)
        .ok_or_else(|| FetchError::Unsupported(instrument.id.clone()))
}

pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> std::result::Result<T, FetchError> {
    tracing::debug!("GET {}", url);
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::Http {
            status: Some(status.as_u16()),
            message: body.chars().take(200).collect(),
        });
    }
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| FetchError::Parse(e.to_string()))
}

/// Providers that quote numbers as JSON strings.
pub(crate) fn parse_decimal(field: &str, raw: &str) -> std::result::Result<f64, FetchError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| FetchError::Parse(format!("{} is not a number: {:?}", field, raw)))
}
