//! Configuration management
//!
//! Settings come from an optional JSON file with defaults for every field.
//! Credentials and the testnet switch are read from the environment (a `.env`
//! file is loaded first when present).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::gateway::Credentials;

/// Live USDT-M futures REST endpoint
pub const LIVE_BASE_URL: &str = "https://fapi.binance.com";

/// Testnet USDT-M futures REST endpoint
pub const TESTNET_BASE_URL: &str = "https://testnet.binancefuture.com";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub grid: GridSettings,
    pub oco: OcoSettings,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.apply_env();
        Ok(config)
    }

    /// Load from `path` when given, otherwise start from defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let mut config = Config::default();
                config.apply_env();
                Ok(config)
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("USE_TESTNET") {
            self.exchange.testnet = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }
    }

    /// API credentials for the selected environment
    ///
    /// Live trading reads `BINANCE_API_KEY`/`BINANCE_API_SECRET`, testnet reads
    /// `TESTNET_API_KEY`/`TESTNET_API_SECRET`.
    pub fn credentials(&self) -> Result<Credentials> {
        let (key_var, secret_var) = if self.exchange.testnet {
            ("TESTNET_API_KEY", "TESTNET_API_SECRET")
        } else {
            ("BINANCE_API_KEY", "BINANCE_API_SECRET")
        };

        let api_key = std::env::var(key_var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .with_context(|| format!("{} is not set", key_var))?;
        let api_secret = std::env::var(secret_var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .with_context(|| format!("{} is not set", secret_var))?;

        Ok(Credentials::new(api_key, api_secret))
    }
}

/// Exchange connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub testnet: bool,
    /// Overrides the live/testnet endpoint when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub recv_window_ms: u64,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Requests per second
    pub rate_limit: usize,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            testnet: false,
            base_url: None,
            recv_window_ms: 5000,
            timeout_secs: 30,
            max_retries: 3,
            rate_limit: 10,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown_secs: 60,
        }
    }
}

impl ExchangeConfig {
    pub fn base_url(&self) -> &str {
        match &self.base_url {
            Some(url) => url.as_str(),
            None if self.testnet => TESTNET_BASE_URL,
            None => LIVE_BASE_URL,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn circuit_breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_cooldown_secs)
    }
}

/// Grid monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    pub poll_interval_secs: u64,
}

impl Default for GridSettings {
    fn default() -> Self {
        GridSettings {
            poll_interval_secs: 10,
        }
    }
}

/// OCO monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcoSettings {
    pub poll_interval_secs: u64,
}

impl Default for OcoSettings {
    fn default() -> Self {
        OcoSettings {
            poll_interval_secs: 2,
        }
    }
}
