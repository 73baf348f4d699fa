use tracing::Span;
use tracing_subscriber::EnvFilter;
use crate::error::{Error, Result};
use crate::types::ids::{InstrumentId, SourceId};

/// Install the global subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| Error::ConfigError(format!("invalid log filter: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| Error::ConfigError(format!("tracing already initialised: {}", e)))
}

pub fn trace_round(instrument: &InstrumentId, round_id: u64) -> Span {
    tracing::info_span!(
        "round",
        instrument = %instrument,
        round_id,
    )
}

pub fn trace_fetch(source: &SourceId, instrument: &InstrumentId) -> Span {
    tracing::debug_span!(
        "fetch",
        source = %source,
        instrument = %instrument,
    )
}
