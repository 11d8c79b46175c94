//! Exchange gateway
//!
//! Controllers talk to the exchange only through the [`Gateway`] trait, so the
//! strategy code runs unchanged against the Binance REST client or an
//! in-memory fake in tests.

mod auth;
mod binance;
mod circuit_breaker;
mod throttle;
pub mod wire;

use async_trait::async_trait;

use crate::error::GatewayResult;
use crate::types::{Order, OrderId, OrderRequest, Position, Symbol};

pub use auth::{sign_query, Credentials};
pub use binance::{BinanceClient, ClientConfig};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use throttle::Throttle;

/// Order management operations the strategy controllers depend on
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Submit a new order
    async fn place_order(&self, request: &OrderRequest) -> GatewayResult<Order>;

    /// Cancel one order
    async fn cancel_order(&self, symbol: &Symbol, order_id: OrderId) -> GatewayResult<()>;

    /// Cancel every open order on a symbol
    async fn cancel_all_orders(&self, symbol: &Symbol) -> GatewayResult<()>;

    /// Orders currently resting on the book for a symbol
    async fn open_orders(&self, symbol: &Symbol) -> GatewayResult<Vec<Order>>;

    /// Last traded price
    async fn current_price(&self, symbol: &Symbol) -> GatewayResult<f64>;

    /// Positions with a non-zero amount
    async fn open_positions(&self) -> GatewayResult<Vec<Position>>;
}
