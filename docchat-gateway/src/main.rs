//! docchat gateway - Main entry point.

use anyhow::Result;
use docchat_common::config::Config;
use docchat_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load_with_env()?;

    init_logging(&config.observability.log_level, &config.observability.log_format);

    tracing::info!("docchat gateway v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    docchat_gateway::start_server(&config).await
}
