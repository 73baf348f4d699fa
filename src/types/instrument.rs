use std::collections::BTreeMap;
use std::fmt;
use serde::{Deserialize, Serialize};
use crate::types::ids::{InstrumentId, SourceId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    SpotPrice,
    FundingRate,
    Pool,
}

impl InstrumentKind {
    /// The metric a consensus estimate is computed for.
    pub fn primary_metric(&self) -> Metric {
        match self {
            InstrumentKind::SpotPrice => Metric::Price,
            InstrumentKind::FundingRate => Metric::FundingRate,
            InstrumentKind::Pool => Metric::Tvl,
        }
    }

    pub fn secondary_metrics(&self) -> &'static [Metric] {
        match self {
            InstrumentKind::Pool => &[Metric::Apy, Metric::Volume24h],
            _ => &[],
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstrumentKind::SpotPrice => "spot_price",
            InstrumentKind::FundingRate => "funding_rate",
            InstrumentKind::Pool => "pool",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Price,
    FundingRate,
    Tvl,
    Apy,
    #[serde(rename = "volume_24h")]
    Volume24h,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::Price => "price",
            Metric::FundingRate => "funding_rate",
            Metric::Tvl => "tvl",
            Metric::Apy => "apy",
            Metric::Volume24h => "volume_24h",
        };
        f.write_str(name)
    }
}

/// Something the feed produces a consensus value for.
///
/// `symbols` maps a source id to the identifier that provider uses for this
/// instrument (`"bitcoin"` on CoinGecko, `"BTCUSDT"` on Binance, a pool uuid on
/// DefiLlama). A source without an entry does not take part in its rounds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: InstrumentId,
    pub kind: InstrumentKind,
    #[serde(default)]
    pub symbols: BTreeMap<SourceId, String>,
}

impl Instrument {
    pub fn new(id: impl Into<InstrumentId>, kind: InstrumentKind) -> Self {
        Instrument {
            id: id.into(),
            kind,
            symbols: BTreeMap::new(),
        }
    }

    pub fn with_symbol(mut self, source: impl Into<SourceId>, symbol: impl Into<String>) -> Self {
        self.symbols.insert(source.into(), symbol.into());
        self
    }

    pub fn symbol_for(&self, source: &SourceId) -> Option<&str> {
        self.symbols.get(source).map(String::as_str)
    }
}
