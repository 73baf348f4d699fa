use async_trait::async_trait;
use serde::Deserialize;
use crate::error::FetchError;
use crate::sources::connectors::{get_json, parse_decimal, serves, symbol, SourceAdapter};
use crate::types::data_point::DataPoint;
use crate::types::ids::SourceId;
use crate::types::instrument::{Instrument, InstrumentKind, Metric};
use crate::types::timestamp::Timestamp;

const SPOT_BASE_URL: &str = "https://api.binance.com";
const FUTURES_BASE_URL: &str = "https://fapi.binance.com";

/// Spot last price and USD-M perpetual funding. A configured base url
/// replaces both hosts.
pub struct BinanceConnector {
    source_id: SourceId,
    spot_url: String,
    futures_url: String,
    client: reqwest::Client,
}

impl BinanceConnector {
    pub fn new(source_id: SourceId, base_url: Option<String>, client: reqwest::Client) -> Self {
        BinanceConnector {
            source_id,
            spot_url: base_url.clone().unwrap_or_else(|| SPOT_BASE_URL.to_string()),
            futures_url: base_url.unwrap_or_else(|| FUTURES_BASE_URL.to_string()),
            client,
        }
    }

    async fn spot_price(&self, instrument: &Instrument, pair: &str) -> Result<DataPoint, FetchError> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.spot_url, pair);
        let ticker: TickerPrice = get_json(&self.client, &url).await?;
        let price = parse_decimal("price", &ticker.price)?;
        // the ticker carries no timestamp
        Ok(DataPoint::new(self.source_id.clone(), instrument.id.clone(), Metric::Price, price, Timestamp::now()))
    }

    async fn funding_rate(&self, instrument: &Instrument, pair: &str) -> Result<DataPoint, FetchError> {
        let url = format!("{}/fapi/v1/premiumIndex?symbol={}", self.futures_url, pair);
        let index: PremiumIndex = get_json(&self.client, &url).await?;
        let rate = parse_decimal("lastFundingRate", &index.last_funding_rate)?;
        Ok(DataPoint::new(
            self.source_id.clone(),
            instrument.id.clone(),
            Metric::FundingRate,
            rate,
            Timestamp::from_millis(index.time),
        ))
    }
}

#[async_trait]
impl SourceAdapter for BinanceConnector {
    fn source_id(&self) -> SourceId {
        self.source_id.clone()
    }

    fn supports(&self, instrument: &Instrument) -> bool {
        serves(&self.source_id, &[InstrumentKind::SpotPrice, InstrumentKind::FundingRate], instrument)
    }

    async fn fetch(&self, instrument: &Instrument) -> Result<DataPoint, FetchError> {
        let pair = symbol(&self.source_id, instrument)?;
        match instrument.kind {
            InstrumentKind::SpotPrice => self.spot_price(instrument, pair).await,
            InstrumentKind::FundingRate => self.funding_rate(instrument, pair).await,
            InstrumentKind::Pool => Err(FetchError::Unsupported(instrument.id.clone())),
        }
    }
}

#[derive(Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndex {
    last_funding_rate: String,
    time: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn connector(server: &MockServer) -> BinanceConnector {
        BinanceConnector::new("binance".into(), Some(server.uri()), reqwest::Client::new())
    }

    #[tokio::test]
    async fn spot_ticker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", "BTCUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "BTCUSDT", "price": "64999.99000000"
            })))
            .mount(&server)
            .await;

        let btc = Instrument::new("BTC", InstrumentKind::SpotPrice).with_symbol("binance", "BTCUSDT");
        let point = connector(&server).fetch(&btc).await.unwrap();
        assert_eq!(point.metric, Metric::Price);
        assert!((point.value - 64999.99).abs() < 1e-9);
    }

    #[tokio::test]
    async fn funding_from_premium_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/premiumIndex"))
            .and(query_param("symbol", "BTCUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "BTCUSDT",
                "markPrice": "65010.1",
                "lastFundingRate": "-0.00012000",
                "time": 1_700_000_000_123u64
            })))
            .mount(&server)
            .await;

        let funding = Instrument::new("BTC-FUNDING", InstrumentKind::FundingRate).with_symbol("binance", "BTCUSDT");
        let point = connector(&server).fetch(&funding).await.unwrap();
        assert_eq!(point.metric, Metric::FundingRate);
        assert!((point.value + 0.00012).abs() < 1e-12);
        assert_eq!(point.observed_at, Timestamp::from_millis(1_700_000_000_123));
    }

    #[tokio::test]
    async fn server_error_is_surfaced_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let btc = Instrument::new("BTC", InstrumentKind::SpotPrice).with_symbol("binance", "BTCUSDT");
        let err = connector(&server).fetch(&btc).await.unwrap_err();
        assert!(matches!(err, FetchError::Http { status: Some(502), .. }));
    }
}
