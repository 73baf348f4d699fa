use std::collections::HashMap;
use async_trait::async_trait;
use serde::Deserialize;
use crate::error::FetchError;
use crate::sources::connectors::{get_json, serves, symbol, SourceAdapter};
use crate::types::data_point::DataPoint;
use crate::types::ids::SourceId;
use crate::types::instrument::{Instrument, InstrumentKind, Metric};
use crate::types::timestamp::Timestamp;

const COINS_BASE_URL: &str = "https://coins.llama.fi";
const YIELDS_BASE_URL: &str = "https://yields.llama.fi";

/// DefiLlama coin prices (`chain:address` symbols) and yield pools (pool
/// uuid symbols). A configured base url replaces both hosts.
pub struct DefiLlamaConnector {
    source_id: SourceId,
    coins_url: String,
    yields_url: String,
    client: reqwest::Client,
}

impl DefiLlamaConnector {
    pub fn new(source_id: SourceId, base_url: Option<String>, client: reqwest::Client) -> Self {
        DefiLlamaConnector {
            source_id,
            coins_url: base_url.clone().unwrap_or_else(|| COINS_BASE_URL.to_string()),
            yields_url: base_url.unwrap_or_else(|| YIELDS_BASE_URL.to_string()),
            client,
        }
    }

    async fn coin_price(&self, instrument: &Instrument, coin: &str) -> Result<DataPoint, FetchError> {
        let url = format!("{}/prices/current/{}", self.coins_url, coin);
        let body: CoinsResponse = get_json(&self.client, &url).await?;
        let quote = body.coins.get(coin)
            .ok_or_else(|| FetchError::Parse(format!("no price for {}", coin)))?;
        let observed_at = quote.timestamp.map(Timestamp::from_secs).unwrap_or_else(Timestamp::now);
        Ok(DataPoint::new(self.source_id.clone(), instrument.id.clone(), Metric::Price, quote.price, observed_at))
    }

    async fn pool(&self, instrument: &Instrument, pool_id: &str) -> Result<DataPoint, FetchError> {
        let url = format!("{}/chart/{}", self.yields_url, pool_id);
        let body: ChartResponse = get_json(&self.client, &url).await?;
        if body.status != "success" {
            return Err(FetchError::Parse(format!("chart status {}", body.status)));
        }
        let latest = body.data.last()
            .ok_or_else(|| FetchError::Parse(format!("empty chart for pool {}", pool_id)))?;
        let tvl = latest.tvl_usd
            .ok_or_else(|| FetchError::Parse(format!("no tvlUsd for pool {}", pool_id)))?;

        // chart rows are daily snapshots, stamped on receipt
        let mut point = DataPoint::new(self.source_id.clone(), instrument.id.clone(), Metric::Tvl, tvl, Timestamp::now());
        if let Some(apy) = latest.apy {
            point = point.with_secondary(Metric::Apy, apy);
        }
        Ok(point)
    }
}

#[async_trait]
impl SourceAdapter for DefiLlamaConnector {
    fn source_id(&self) -> SourceId {
        self.source_id.clone()
    }

    fn supports(&self, instrument: &Instrument) -> bool {
        serves(&self.source_id, &[InstrumentKind::SpotPrice, InstrumentKind::Pool], instrument)
    }

    async fn fetch(&self, instrument: &Instrument) -> Result<DataPoint, FetchError> {
        let key = symbol(&self.source_id, instrument)?;
        match instrument.kind {
            InstrumentKind::SpotPrice => self.coin_price(instrument, key).await,
            InstrumentKind::Pool => self.pool(instrument, key).await,
            InstrumentKind::FundingRate => Err(FetchError::Unsupported(instrument.id.clone())),
        }
    }
}

#[derive(Deserialize)]
struct CoinsResponse {
    coins: HashMap<String, CoinQuote>,
}

#[derive(Deserialize)]
struct CoinQuote {
    price: f64,
    timestamp: Option<u64>,
}

#[derive(Deserialize)]
struct ChartResponse {
    status: String,
    #[serde(default)]
    data: Vec<ChartRow>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartRow {
    tvl_usd: Option<f64>,
    apy: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const POOL_ID: &str = "aa70268e-4b52-42bf-a116-608b370f9501";

    fn connector(server: &MockServer) -> DefiLlamaConnector {
        DefiLlamaConnector::new("defillama".into(), Some(server.uri()), reqwest::Client::new())
    }

    #[tokio::test]
    async fn coin_price_by_chain_address() {
        let server = MockServer::start().await;
        let coin = "ethereum:0x0000000000000000000000000000000000000000";
        Mock::given(method("GET"))
            .and(path(format!("/prices/current/{}", coin)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "coins": { coin: { "price": 3400.25, "symbol": "ETH", "timestamp": 1_700_000_100u64 } }
            })))
            .mount(&server)
            .await;

        let eth = Instrument::new("ETH", InstrumentKind::SpotPrice).with_symbol("defillama", coin);
        let point = connector(&server).fetch(&eth).await.unwrap();
        assert_eq!(point.value, 3400.25);
        assert_eq!(point.observed_at, Timestamp::from_secs(1_700_000_100));
    }

    #[tokio::test]
    async fn pool_takes_latest_chart_row() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/chart/{}", POOL_ID)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": [
                    { "timestamp": "2024-01-01T00:00:00.000Z", "tvlUsd": 250_000_000.0, "apy": 11.0 },
                    { "timestamp": "2024-01-02T00:00:00.000Z", "tvlUsd": 260_000_000.0, "apy": 12.5 }
                ]
            })))
            .mount(&server)
            .await;

        let pool = Instrument::new("USDC-ETH", InstrumentKind::Pool).with_symbol("defillama", POOL_ID);
        let point = connector(&server).fetch(&pool).await.unwrap();
        assert_eq!(point.metric, Metric::Tvl);
        assert_eq!(point.value, 260_000_000.0);
        assert_eq!(point.value_of(Metric::Apy), Some(12.5));
    }

    #[tokio::test]
    async fn empty_chart_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success", "data": []
            })))
            .mount(&server)
            .await;

        let pool = Instrument::new("USDC-ETH", InstrumentKind::Pool).with_symbol("defillama", POOL_ID);
        assert!(matches!(connector(&server).fetch(&pool).await, Err(FetchError::Parse(_))));
    }
}
