//! CLI command implementations

pub mod grid;
pub mod oco;
pub mod orders;
pub mod stop;
pub mod twap;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use futures_strategies::gateway::{BinanceClient, ClientConfig};
use futures_strategies::{Config, Gateway};

/// Build an authenticated client and check that the exchange answers
pub async fn connect(config: &Config) -> Result<Arc<dyn Gateway>> {
    let credentials = config.credentials()?;
    let client = BinanceClient::new(credentials, ClientConfig::from_exchange(&config.exchange))?;

    info!(
        base_url = client.base_url(),
        testnet = config.exchange.testnet,
        "Connecting to Binance futures"
    );
    client
        .ping()
        .await
        .context("Binance futures API is unreachable")?;

    Ok(Arc::new(client))
}

pub fn rule() -> String {
    "=".repeat(60)
}
