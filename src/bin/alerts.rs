use std::sync::Arc;

use clap::Parser;
use portal_monitoring::{
    Stores,
    alerts::AlertEngine,
    config::{AlertEngineConfig, read_config_file},
    dispatch::run_bounded,
    notify::{LogNotifier, NotificationDispatcher, Notifier, WebhookNotifier},
    shutdown::Shutdown,
    util::{get_config_path, init_tracing},
};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (defaults to $PORTAL_CONFIG or ./portal.json)
    #[arg(short)]
    file: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing("portal_alerts");
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file.unwrap_or_else(get_config_path))?;
    if config.alerts.evaluation_interval_secs == 0 {
        anyhow::bail!("alerts.evaluation_interval_secs must be greater than zero");
    }

    let stores = Stores::open(&config.storage()).await?;

    let engine = Arc::new(AlertEngine::new(stores.alerts.clone(), &config.alerts));

    let notifier: Arc<dyn Notifier> = match &config.alerts.webhook {
        Some(webhook) => Arc::new(WebhookNotifier::new(webhook.clone())?),
        None => Arc::new(LogNotifier),
    };
    let dispatcher =
        NotificationDispatcher::new(engine.notification_queue(), notifier, stores.alerts);

    let shutdown = Shutdown::new();
    shutdown.listen_for_signals();

    tokio::join!(
        evaluation_loop(engine, &config.alerts, &shutdown),
        dispatcher.run(&shutdown),
    );

    info!("alert service stopped");
    Ok(())
}

#[instrument(skip_all)]
async fn evaluation_loop(engine: Arc<AlertEngine>, config: &AlertEngineConfig, shutdown: &Shutdown) {
    if config.projects.is_empty() {
        warn!("no projects configured, nothing to evaluate");
    }

    let mut ticker = interval(config.evaluation_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.wait() => break,

            _ = ticker.tick() => {
                debug!("evaluating {} projects", config.projects.len());

                let engine = engine.clone();
                run_bounded(config.projects.clone(), config.max_concurrent_projects, move |project_id| {
                    let engine = engine.clone();
                    async move {
                        if let Err(e) = engine.evaluate_rules(project_id).await {
                            error!("failed to evaluate rules for project {project_id}: {e}");
                        }
                    }
                })
                .await;
            }
        }
    }
}
