use async_trait::async_trait;
use serde::Deserialize;
use crate::error::FetchError;
use crate::sources::connectors::{get_json, parse_decimal, serves, symbol, SourceAdapter};
use crate::types::data_point::DataPoint;
use crate::types::ids::SourceId;
use crate::types::instrument::{Instrument, InstrumentKind, Metric};
use crate::types::timestamp::Timestamp;

const DEFAULT_BASE_URL: &str = "https://api.geckoterminal.com/api/v2";

/// DEX pool reserve and 24h volume. Symbols are `network/pool_address`.
pub struct GeckoTerminalConnector {
    source_id: SourceId,
    base_url: String,
    client: reqwest::Client,
}

impl GeckoTerminalConnector {
    pub fn new(source_id: SourceId, base_url: Option<String>, client: reqwest::Client) -> Self {
        GeckoTerminalConnector {
            source_id,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client,
        }
    }
}

#[async_trait]
impl SourceAdapter for GeckoTerminalConnector {
    fn source_id(&self) -> SourceId {
        self.source_id.clone()
    }

    fn supports(&self, instrument: &Instrument) -> bool {
        serves(&self.source_id, &[InstrumentKind::Pool], instrument)
    }

    async fn fetch(&self, instrument: &Instrument) -> Result<DataPoint, FetchError> {
        let key = symbol(&self.source_id, instrument)?;
        let (network, address) = key.split_once('/')
            .ok_or_else(|| FetchError::Unsupported(instrument.id.clone()))?;

        let url = format!("{}/networks/{}/pools/{}", self.base_url, network, address);
        let body: PoolResponse = get_json(&self.client, &url).await?;
        let attributes = body.data.attributes;

        let reserve = attributes.reserve_in_usd
            .ok_or_else(|| FetchError::Parse(format!("no reserve_in_usd for {}", key)))?;
        let tvl = parse_decimal("reserve_in_usd", &reserve)?;

        let mut point = DataPoint::new(self.source_id.clone(), instrument.id.clone(), Metric::Tvl, tvl, Timestamp::now());
        if let Some(h24) = attributes.volume_usd.and_then(|v| v.h24) {
            point = point.with_secondary(Metric::Volume24h, parse_decimal("volume_usd.h24", &h24)?);
        }
        Ok(point)
    }
}

#[derive(Deserialize)]
struct PoolResponse {
    data: PoolData,
}

#[derive(Deserialize)]
struct PoolData {
    attributes: PoolAttributes,
}

#[derive(Deserialize)]
struct PoolAttributes {
    reserve_in_usd: Option<String>,
    volume_usd: Option<VolumeUsd>,
}

#[derive(Deserialize)]
struct VolumeUsd {
    h24: Option<String>,
}
