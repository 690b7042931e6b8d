use std::path::PathBuf;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

const PORTAL_CONFIG: &str = "PORTAL_CONFIG";

const DEFAULT_CONFIG: &str = "./portal.json";

/// Config file path from `PORTAL_CONFIG`, falling back to `./portal.json`
pub fn get_config_path() -> String {
    std::env::var(PORTAL_CONFIG).unwrap_or_else(|_| DEFAULT_CONFIG.to_string())
}

const PORTAL_DATABASE: &str = "PORTAL_DATABASE";

pub fn get_database_path() -> Option<PathBuf> {
    std::env::var(PORTAL_DATABASE).ok().map(PathBuf::from)
}

/// Install the stderr subscriber for the library and the binary's own target
pub fn init_tracing(binary_target: &'static str) {
    let filter = filter::Targets::new().with_targets(vec![
        ("portal_monitoring", LevelFilter::DEBUG),
        (binary_target, LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}
