use async_trait::async_trait;
use serde::Deserialize;
use crate::error::FetchError;
use crate::sources::connectors::{get_json, parse_decimal, serves, symbol, SourceAdapter};
use crate::types::data_point::DataPoint;
use crate::types::ids::SourceId;
use crate::types::instrument::{Instrument, InstrumentKind, Metric};
use crate::types::timestamp::Timestamp;

const DEFAULT_BASE_URL: &str = "https://api.bybit.com";

/// Linear perpetual funding from the v5 tickers endpoint.
pub struct BybitConnector {
    source_id: SourceId,
    base_url: String,
    client: reqwest::Client,
}

impl BybitConnector {
    pub fn new(source_id: SourceId, base_url: Option<String>, client: reqwest::Client) -> Self {
        BybitConnector {
            source_id,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client,
        }
    }
}

#[async_trait]
impl SourceAdapter for BybitConnector {
    fn source_id(&self) -> SourceId {
        self.source_id.clone()
    }

    fn supports(&self, instrument: &Instrument) -> bool {
        serves(&self.source_id, &[InstrumentKind::FundingRate], instrument)
    }

    async fn fetch(&self, instrument: &Instrument) -> Result<DataPoint, FetchError> {
        let pair = symbol(&self.source_id, instrument)?;
        let url = format!("{}/v5/market/tickers?category=linear&symbol={}", self.base_url, pair);
        let body: TickersResponse = get_json(&self.client, &url).await?;

        // Bybit reports API errors (rate limits included) with HTTP 200
        if body.ret_code != 0 {
            return Err(FetchError::Http {
                status: None,
                message: format!("retCode {}: {}", body.ret_code, body.ret_msg),
            });
        }

        let ticker = body.result
            .and_then(|r| r.list.into_iter().find(|t| t.symbol == pair))
            .ok_or_else(|| FetchError::Parse(format!("no ticker for {}", pair)))?;
        let rate = parse_decimal("fundingRate", &ticker.funding_rate)?;
        let observed_at = body.time.map(Timestamp::from_millis).unwrap_or_else(Timestamp::now);

        Ok(DataPoint::new(self.source_id.clone(), instrument.id.clone(), Metric::FundingRate, rate, observed_at))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickersResponse {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<TickersResult>,
    time: Option<u64>,
}

#[derive(Deserialize)]
struct TickersResult {
    #[serde(default)]
    list: Vec<Ticker>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker {
    symbol: String,
    funding_rate: String,
}
