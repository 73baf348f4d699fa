use lazy_static::lazy_static;
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};
use crate::error::{Error, Result};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Round metrics
    pub static ref ROUNDS_TOTAL: IntCounter = IntCounter::new(
        "feed_rounds_total",
        "Total number of fetch rounds run"
    ).expect("metric can be created");

    pub static ref ROUNDS_UNAVAILABLE: IntCounterVec = IntCounterVec::new(
        Opts::new("feed_rounds_unavailable_total", "Rounds that produced no consensus"),
        &["reason"]
    ).expect("metric can be created");

    pub static ref ROUND_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "feed_round_latency_seconds",
            "Wall time of one fetch round"
        ).buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0])
    ).expect("metric can be created");

    // Source metrics
    pub static ref SOURCE_FETCH_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("feed_source_fetch_failures_total", "Failed fetches per source"),
        &["source", "kind"]
    ).expect("metric can be created");

    pub static ref LATE_RESULTS_DISCARDED: IntCounter = IntCounter::new(
        "feed_late_results_discarded_total",
        "Adapter results that missed their round deadline"
    ).expect("metric can be created");

    // Monitoring metrics
    pub static ref ALERTS_RAISED: IntCounterVec = IntCounterVec::new(
        Opts::new("feed_alerts_raised_total", "Alerts raised by kind and severity"),
        &["kind", "severity"]
    ).expect("metric can be created");

    pub static ref QUALITY_SCORE: GaugeVec = GaugeVec::new(
        Opts::new("feed_quality_score", "Latest quality score per instrument"),
        &["instrument"]
    ).expect("metric can be created");
}

pub fn register_metrics() -> Result<()> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ROUNDS_TOTAL.clone()),
        Box::new(ROUNDS_UNAVAILABLE.clone()),
        Box::new(ROUND_LATENCY.clone()),
        Box::new(SOURCE_FETCH_FAILURES.clone()),
        Box::new(LATE_RESULTS_DISCARDED.clone()),
        Box::new(ALERTS_RAISED.clone()),
        Box::new(QUALITY_SCORE.clone()),
    ];

    for collector in collectors {
        REGISTRY.register(collector)
            .map_err(|e| Error::MetricsError(e.to_string()))?;
    }
    Ok(())
}

/// Text exposition of everything in [`REGISTRY`].
pub fn render() -> Result<String> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| Error::MetricsError(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| Error::MetricsError(e.to_string()))
}
