//! Futures Strategies
//!
//! Client-side grid, OCO and TWAP strategies for Binance USDT-M futures.
//! The exchange offers none of these natively, so each controller keeps its
//! own state and reconciles it against the exchange by polling.

pub mod config;
pub mod error;
pub mod gateway;
pub mod orders;
pub mod strategies;
pub mod types;
pub mod validation;

pub use config::Config;
pub use error::{GatewayError, StrategyError, ValidationError};
pub use gateway::Gateway;
pub use types::*;
