//! Relay - main entry point.

use anyhow::Result;
use relay_channels::start;
use relay_common::config::Config;
use relay_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load_with_env()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Relay v{}", env!("CARGO_PKG_VERSION"));

    start(&config).await
}
