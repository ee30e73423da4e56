mod bot;

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use zepix_trading_bot::config::{Config, ConfigStore};

use crate::bot::ZepixBot;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let store = Arc::new(ConfigStore::new(cfg));
    let mut bot = ZepixBot::new(store)?;
    bot.run().await?;

    Ok(())
}
