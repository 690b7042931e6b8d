use clap::Parser;
use portal_monitoring::{
    Stores,
    config::read_config_file,
    shutdown::Shutdown,
    util::{get_config_path, init_tracing},
    workers::AggregationProcessor,
};
use tracing::{error, info, trace};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (defaults to $PORTAL_CONFIG or ./portal.json)
    #[arg(short)]
    file: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing("portal_aggregation_worker");
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file.unwrap_or_else(get_config_path))?;
    let stores = Stores::open(&config.storage()).await?;

    let worker = AggregationProcessor::new(
        stores.aggregates,
        config.aggregation_worker.stale_threshold(),
    )
    .into_worker(&config.aggregation_worker);

    let shutdown = Shutdown::new();
    shutdown.listen_for_signals();

    info!("aggregation worker starting");
    if let Err(e) = worker.start(&shutdown).await {
        error!("worker error: {e:#}");
        return Err(e);
    }
    info!("aggregation worker stopped");

    Ok(())
}
