use std::sync::Arc;

use clap::Parser;
use portal_monitoring::{
    Stores,
    config::read_config_file,
    shutdown::Shutdown,
    util::{get_config_path, init_tracing},
    workers::{ReportProcessor, SimulatedReportExecutor},
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
    init_tracing("portal_report_worker");
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file.unwrap_or_else(get_config_path))?;
    let stores = Stores::open(&config.storage()).await?;

    let worker = ReportProcessor::new(
        stores.reports,
        Arc::new(SimulatedReportExecutor::default()),
        config.report_worker.execution_timeout(),
    )
    .into_worker(&config.report_worker);

    let shutdown = Shutdown::new();
    shutdown.listen_for_signals();

    info!("report worker starting");
    if let Err(e) = worker.start(&shutdown).await {
        error!("worker error: {e:#}");
        return Err(e);
    }
    info!("report worker stopped");

    Ok(())
}
