use std::collections::HashMap;
use async_trait::async_trait;
use serde::Deserialize;
use crate::error::FetchError;
use crate::sources::connectors::{get_json, serves, symbol, SourceAdapter};
use crate::types::data_point::DataPoint;
use crate::types::ids::SourceId;
use crate::types::instrument::{Instrument, InstrumentKind, Metric};
use crate::types::timestamp::Timestamp;

const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Spot prices from the CoinGecko simple price endpoint. Symbols are
/// CoinGecko coin ids (`bitcoin`, `ethereum`).
pub struct CoinGeckoConnector {
    source_id: SourceId,
    base_url: String,
    client: reqwest::Client,
}

impl CoinGeckoConnector {
    pub fn new(source_id: SourceId, base_url: Option<String>, client: reqwest::Client) -> Self {
        CoinGeckoConnector {
            source_id,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client,
        }
    }
}

#[async_trait]
impl SourceAdapter for CoinGeckoConnector {
    fn source_id(&self) -> SourceId {
        self.source_id.clone()
    }

    fn supports(&self, instrument: &Instrument) -> bool {
        serves(&self.source_id, &[InstrumentKind::SpotPrice], instrument)
    }

    async fn fetch(&self, instrument: &Instrument) -> Result<DataPoint, FetchError> {
        let coin = symbol(&self.source_id, instrument)?;
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies=usd&include_last_updated_at=true",
            self.base_url, coin
        );
        let body: HashMap<String, SimplePrice> = get_json(&self.client, &url).await?;

        let quote = body.get(coin)
            .ok_or_else(|| FetchError::Parse(format!("no quote for {}", coin)))?;
        let price = quote.usd
            .ok_or_else(|| FetchError::Parse(format!("no usd price for {}", coin)))?;
        let observed_at = quote.last_updated_at
            .map(Timestamp::from_secs)
            .unwrap_or_else(Timestamp::now);

        Ok(DataPoint::new(self.source_id.clone(), instrument.id.clone(), Metric::Price, price, observed_at))
    }
}

#[derive(Deserialize)]
struct SimplePrice {
    usd: Option<f64>,
    last_updated_at: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn btc() -> Instrument {
        Instrument::new("BTC", InstrumentKind::SpotPrice).with_symbol("coingecko", "bitcoin")
    }

    async fn connector(server: &MockServer) -> CoinGeckoConnector {
        CoinGeckoConnector::new("coingecko".into(), Some(server.uri()), reqwest::Client::new())
    }

    #[tokio::test]
    async fn parses_simple_price() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .and(query_param("ids", "bitcoin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "bitcoin": { "usd": 65000.5, "last_updated_at": 1_700_000_000u64 }
            })))
            .mount(&server)
            .await;

        let point = connector(&server).await.fetch(&btc()).await.unwrap();
        assert_eq!(point.value, 65000.5);
        assert_eq!(point.metric, Metric::Price);
        assert_eq!(point.observed_at, Timestamp::from_secs(1_700_000_000));
        assert_eq!(point.source, SourceId::from("coingecko"));
    }

    #[tokio::test]
    async fn missing_coin_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = connector(&server).await.fetch(&btc()).await.unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[tokio::test]
    async fn rate_limit_is_retryable_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = connector(&server).await.fetch(&btc()).await.unwrap_err();
        assert_eq!(err, FetchError::Http { status: Some(429), message: String::new() });
        assert!(err.is_retryable());
    }

    #[test]
    fn only_spot_prices_with_a_coin_id() {
        let c = CoinGeckoConnector::new("coingecko".into(), None, reqwest::Client::new());
        assert!(c.supports(&btc()));
        let funding = Instrument::new("BTC-FUNDING", InstrumentKind::FundingRate).with_symbol("coingecko", "bitcoin");
        assert!(!c.supports(&funding));
    }
}
