//! Single-order execution
//!
//! Thin wrappers that validate input, log the distance to the current market,
//! submit one order and write a trade record.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{StrategyError, StrategyResult};
use crate::gateway::Gateway;
use crate::types::{Order, OrderRequest, Side, Symbol, TimeInForce};
use crate::validation::{
    validate_callback_rate, validate_price, validate_quantity, validate_symbol,
};

/// Options for a limit order
#[derive(Debug, Clone, Copy)]
pub struct LimitOptions {
    pub time_in_force: TimeInForce,
    pub post_only: bool,
    pub reduce_only: bool,
}

impl Default for LimitOptions {
    fn default() -> Self {
        Self {
            time_in_force: TimeInForce::GTC,
            post_only: false,
            reduce_only: false,
        }
    }
}

/// Places individual orders through a [`Gateway`]
pub struct OrderExecutor {
    gateway: Arc<dyn Gateway>,
}

impl OrderExecutor {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    pub async fn market(&self, symbol: &str, side: Side, quantity: f64) -> StrategyResult<Order> {
        let symbol = validate_symbol(symbol)?;
        let quantity = validate_quantity(quantity)?;

        if let Some(price) = self.market_price(&symbol).await {
            info!(
                symbol = %symbol,
                side = %side,
                quantity,
                "Market order notional approx {:.2} USDT at {}",
                quantity * price,
                price
            );
        }

        let request = OrderRequest::market(&symbol, side, quantity);
        self.submit(&request, "place market order").await
    }

    pub async fn limit(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        price: f64,
        options: LimitOptions,
    ) -> StrategyResult<Order> {
        let symbol = validate_symbol(symbol)?;
        let quantity = validate_quantity(quantity)?;
        let price = validate_price(price)?;

        if let Some(market) = self.market_price(&symbol).await {
            let distance = (price - market) / market * 100.0;
            info!(
                symbol = %symbol,
                side = %side,
                price,
                "Limit price {:+.2}% from market {}",
                distance,
                market
            );

            let crosses = match side {
                Side::Buy => price >= market,
                Side::Sell => price <= market,
            };
            if crosses && options.post_only {
                warn!(
                    symbol = %symbol,
                    price,
                    market,
                    "Post-only order would cross the book and will be rejected"
                );
            } else if crosses {
                info!(symbol = %symbol, "Limit price is marketable and may fill immediately");
            }
        }

        let mut request = if options.post_only {
            OrderRequest::post_only(&symbol, side, quantity, price)
        } else {
            OrderRequest::limit(&symbol, side, quantity, price, options.time_in_force)
        };
        if options.reduce_only {
            request = request.reduce_only();
        }
        self.submit(&request, "place limit order").await
    }

    /// Stop-limit: a limit order at `limit_price` armed when `stop_price` trades
    pub async fn stop_limit(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        stop_price: f64,
        limit_price: f64,
        reduce_only: bool,
    ) -> StrategyResult<Order> {
        let symbol = validate_symbol(symbol)?;
        let quantity = validate_quantity(quantity)?;
        let stop_price = validate_price(stop_price)?;
        let limit_price = validate_price(limit_price)?;

        let slack_ok = match side {
            Side::Buy => limit_price >= stop_price,
            Side::Sell => limit_price <= stop_price,
        };
        if !slack_ok {
            warn!(
                symbol = %symbol,
                side = %side,
                stop_price,
                limit_price,
                "Limit price is on the unfavourable side of the stop, order may not fill once triggered"
            );
        }
        self.log_stop_distance(&symbol, side, stop_price).await;

        let mut request =
            OrderRequest::stop_limit(&symbol, side, quantity, stop_price, limit_price);
        if reduce_only {
            request = request.reduce_only();
        }
        self.submit(&request, "place stop-limit order").await
    }

    pub async fn stop_market(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        stop_price: f64,
        reduce_only: bool,
    ) -> StrategyResult<Order> {
        let symbol = validate_symbol(symbol)?;
        let quantity = validate_quantity(quantity)?;
        let stop_price = validate_price(stop_price)?;
        self.log_stop_distance(&symbol, side, stop_price).await;

        let mut request = OrderRequest::stop_market(&symbol, side, quantity, stop_price);
        if reduce_only {
            request = request.reduce_only();
        }
        self.submit(&request, "place stop-market order").await
    }

    /// Trailing stop; `callback_rate` is the trailing distance in percent
    pub async fn trailing_stop(
        &self,
        symbol: &str,
        side: Side,
        quantity: f64,
        callback_rate: f64,
        activation_price: Option<f64>,
        reduce_only: bool,
    ) -> StrategyResult<Order> {
        let symbol = validate_symbol(symbol)?;
        let quantity = validate_quantity(quantity)?;
        let callback_rate = validate_callback_rate(callback_rate)?;
        let activation_price = activation_price.map(validate_price).transpose()?;

        let mut request =
            OrderRequest::trailing_stop(&symbol, side, quantity, callback_rate, activation_price);
        if reduce_only {
            request = request.reduce_only();
        }
        self.submit(&request, "place trailing stop").await
    }

    async fn market_price(&self, symbol: &Symbol) -> Option<f64> {
        match self.gateway.current_price(symbol).await {
            Ok(price) => Some(price),
            Err(e) => {
                warn!(symbol = %symbol, "Could not fetch market price: {}", e);
                None
            }
        }
    }

    async fn log_stop_distance(&self, symbol: &Symbol, side: Side, stop_price: f64) {
        let Some(market) = self.market_price(symbol).await else {
            return;
        };
        let already_triggered = match side {
            Side::Buy => stop_price <= market,
            Side::Sell => stop_price >= market,
        };
        if already_triggered {
            warn!(
                symbol = %symbol,
                side = %side,
                stop_price,
                market,
                "Stop price would trigger immediately"
            );
        } else {
            info!(
                symbol = %symbol,
                stop_price,
                "Stop is {:.2}% from market {}",
                (stop_price - market).abs() / market * 100.0,
                market
            );
        }
    }

    async fn submit(
        &self,
        request: &OrderRequest,
        operation: &'static str,
    ) -> StrategyResult<Order> {
        let order = self
            .gateway
            .place_order(request)
            .await
            .map_err(|e| StrategyError::gateway(&request.symbol, operation, e))?;
        log_trade(&order);
        Ok(order)
    }
}

/// Structured trade record, written under the `trades` target
pub fn log_trade(order: &Order) {
    info!(
        target: "trades",
        symbol = %order.symbol,
        order_id = order.id,
        side = %order.side,
        order_type = %order.order_type,
        quantity = order.quantity,
        price = order.price.unwrap_or(0.0),
        stop_price = order.stop_price.unwrap_or(0.0),
        status = ?order.status,
        executed = order.executed_quantity,
        "Order placed"
    );
}
