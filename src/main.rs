use std::sync::Arc;
use std::time::Duration;
use clap::Parser;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use feed_infra::config::loader::AppConfig;
use feed_infra::core::{ConsensusOutcome, FeedEngine};
use feed_infra::observability::metrics::{register_metrics, render};
use feed_infra::observability::tracing::init_tracing;
use feed_infra::sources::SourceRegistry;
use feed_infra::sources::connectors::build_client;
use feed_infra::types::ids::InstrumentId;
use feed_infra::utils::task_supervisor::TaskSupervisor;

#[derive(Parser)]
#[command(name = "feed-infra")]
#[command(about = "Multi-source market data consensus and quality monitor")]
struct Cli {
    /// Overlay config/<ENV>.toml on top of config/default.toml
    #[arg(short, long, default_value = "development")]
    env: String,

    /// Run one round per instrument, print the reports and exit
    #[arg(long)]
    once: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Print the Prometheus exposition after a --once run
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let app = AppConfig::load(&cli.env)?;
    init_tracing(&app.logging.filter, cli.json_logs || app.logging.json)?;
    register_metrics()?;

    let registry = SourceRegistry::from_configs(&app.feed, &app.sources, build_client()?)?;
    let engine = Arc::new(FeedEngine::new(app.feed.clone(), Arc::new(registry), app.instruments.clone())?);
    info!(
        "Feed engine ready: {} instruments, {} sources (env {})",
        engine.instruments().count(),
        engine.registry().len(),
        cli.env
    );

    if cli.once {
        run_once(&engine).await?;
        if cli.metrics {
            print!("{}", render()?);
        }
        return Ok(());
    }

    let mut supervisor = TaskSupervisor::new();
    for instrument in engine.instruments() {
        let name = format!("poll:{}", instrument.id);
        supervisor.spawn(name, poll_loop(engine.clone(), instrument.id.clone(), app.poll.interval()));
    }

    let retention = app.feed.alerts.retention();
    let mut housekeeping = tokio::time::interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = housekeeping.tick() => {
                if let Err(e) = supervisor.check_health() {
                    error!("Supervisor: {}", e);
                }
                engine.alert_sink().prune(retention);
                let summary = engine.status_summary();
                debug!("Feed status {:?}: {} alerts in window", summary.status, summary.total);
            }
        }
    }

    supervisor.shutdown_all();
    Ok(())
}

async fn run_once(engine: &FeedEngine) -> anyhow::Result<()> {
    let ids: Vec<InstrumentId> = engine.instruments().map(|i| i.id.clone()).collect();
    let outcomes = futures::future::join_all(ids.iter().map(|id| engine.get_consensus(id))).await;

    for outcome in outcomes {
        println!("{}", serde_json::to_string_pretty(&outcome?)?);
    }
    println!("{}", serde_json::to_string_pretty(&engine.status_summary())?);
    Ok(())
}

async fn poll_loop(engine: Arc<FeedEngine>, id: InstrumentId, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match engine.get_consensus(&id).await {
            Ok(ConsensusOutcome::Available(report)) => {
                debug!("{} round {}: {}", id, report.round_id, report.result.estimate);
            }
            Ok(ConsensusOutcome::Unavailable(unavailable)) => {
                warn!("{} unavailable: {}", id, unavailable.reason.as_str());
            }
            Err(e) => {
                error!("Poll loop for {} stopping: {}", id, e);
                return;
            }
        }
    }
}
