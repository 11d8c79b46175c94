//! Grid trading controller
//!
//! A grid is a fixed ladder of price levels between a lower and an upper
//! bound. Post-only buys rest on every level below the market and post-only
//! sells on every level above it. When a buy fills, a sell is quoted on the
//! next level up; when a sell fills, a buy is quoted on the next level down.
//!
//! The exchange has no notion of a grid, so all of this state is client-side
//! and is reconciled against the open-order list on every monitor tick.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::schedule::pause;
use super::MonitorExit;
use crate::error::{GatewayError, StrategyError, StrategyResult};
use crate::gateway::Gateway;
use crate::orders::log_trade;
use crate::types::{OrderId, OrderRequest, OrderType, Side, Symbol};
use crate::validation::{validate_price, validate_quantity, validate_symbol};

pub const MIN_GRIDS: usize = 2;
pub const MAX_GRIDS: usize = 50;

/// Smallest accepted range, as a fraction of the lower bound
pub const MIN_RANGE_FRACTION: f64 = 0.005;

/// Buffer applied to the capital estimate
const CAPITAL_BUFFER: f64 = 1.2;

/// Grid shape requested by the caller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridParams {
    pub lower_price: f64,
    pub upper_price: f64,
    pub num_grids: usize,
    pub quantity_per_level: f64,
    pub auto_rebalance: bool,
}

/// A resting grid order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridOrder {
    pub id: OrderId,
    /// Grid level the order was quoted at
    pub price: f64,
    pub quantity: f64,
}

/// Live state of one grid
#[derive(Debug, Clone)]
pub struct GridConfig {
    pub symbol: Symbol,
    pub lower_price: f64,
    pub upper_price: f64,
    pub levels: Vec<f64>,
    pub quantity_per_level: f64,
    pub buy_orders: Vec<GridOrder>,
    pub sell_orders: Vec<GridOrder>,
    pub auto_rebalance: bool,
    /// Estimated profit booked on completed buy-then-sell legs
    pub total_profit: f64,
    pub trades_executed: u32,
    pub created_at: DateTime<Utc>,
    pub entry_price: f64,
    pub capital_estimate: f64,
}

impl GridConfig {
    pub fn step(&self) -> f64 {
        grid_step(self.lower_price, self.upper_price, self.levels.len())
    }

    pub fn active_orders(&self) -> usize {
        self.buy_orders.len() + self.sell_orders.len()
    }
}

/// What one reconciliation pass did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub buys_filled: usize,
    pub sells_filled: usize,
    pub orders_placed: usize,
    pub placement_failures: usize,
    /// Filled orders with no level on the opposite side
    pub vacated_slots: usize,
    pub profit: f64,
}

impl ReconcileReport {
    pub fn fills(&self) -> usize {
        self.buys_filled + self.sells_filled
    }
}

/// Final statistics of a monitor run
#[derive(Debug, Clone)]
pub struct GridSummary {
    pub symbol: Symbol,
    pub runtime: Duration,
    pub iterations: u64,
    pub trades_executed: u32,
    pub total_profit: f64,
    pub active_buys: usize,
    pub active_sells: usize,
    pub exit: MonitorExit,
}

/// Result of stopping a grid
#[derive(Debug)]
pub struct GridStopOutcome {
    /// The discarded grid, if this controller was tracking one
    pub config: Option<GridConfig>,
    /// Whether the exchange confirmed the cancel-all
    pub orders_cancelled: bool,
}

fn grid_step(lower: f64, upper: f64, num_grids: usize) -> f64 {
    if num_grids < 2 {
        return 0.0;
    }
    (upper - lower) / (num_grids - 1) as f64
}

/// Evenly spaced levels from `lower` to `upper` inclusive
///
/// The last level is exactly `upper`, whatever the float error of the step.
pub fn grid_levels(lower: f64, upper: f64, num_grids: usize) -> Vec<f64> {
    let step = grid_step(lower, upper, num_grids);
    (0..num_grids)
        .map(|i| {
            if i + 1 == num_grids && num_grids > 1 {
                upper
            } else {
                lower + step * i as f64
            }
        })
        .collect()
}

fn tolerance(price: f64) -> f64 {
    price.abs().max(1.0) * 1e-9
}

/// Smallest level strictly above `price`
pub fn next_level_above(levels: &[f64], price: f64) -> Option<f64> {
    levels
        .iter()
        .copied()
        .find(|&level| level > price + tolerance(price))
}

/// Greatest level strictly below `price`
pub fn next_level_below(levels: &[f64], price: f64) -> Option<f64> {
    levels
        .iter()
        .rev()
        .copied()
        .find(|&level| level < price - tolerance(price))
}

/// Level equal to `price` within half a percent of a step
fn matching_level(levels: &[f64], step: f64, price: f64) -> Option<f64> {
    let tol = (step * 0.005).max(tolerance(price));
    levels
        .iter()
        .copied()
        .find(|&level| (level - price).abs() <= tol)
}

/// Informational capital requirement: notional of every buy level below the
/// market plus every sell level above it, with a 20% buffer
pub fn capital_estimate(levels: &[f64], quantity: f64, current_price: f64) -> f64 {
    let buys: f64 = levels
        .iter()
        .filter(|&&p| p < current_price)
        .map(|p| p * quantity)
        .sum();
    let sells: f64 = levels
        .iter()
        .filter(|&&p| p > current_price)
        .map(|p| p * quantity)
        .sum();
    (buys + sells) * CAPITAL_BUFFER
}

fn check_params(symbol: &str, params: &GridParams) -> StrategyResult<Symbol> {
    let symbol = validate_symbol(symbol)?;
    validate_quantity(params.quantity_per_level)?;
    validate_price(params.lower_price)?;
    validate_price(params.upper_price)?;

    if !(MIN_GRIDS..=MAX_GRIDS).contains(&params.num_grids) {
        return Err(StrategyError::configuration(format!(
            "Number of grids must be between {} and {}, got {}",
            MIN_GRIDS, MAX_GRIDS, params.num_grids
        )));
    }
    if params.lower_price >= params.upper_price {
        return Err(StrategyError::configuration(format!(
            "Lower price {} must be below upper price {}",
            params.lower_price, params.upper_price
        )));
    }
    let width = (params.upper_price - params.lower_price) / params.lower_price;
    if width < MIN_RANGE_FRACTION {
        return Err(StrategyError::configuration(format!(
            "Grid range {:.3}% is too narrow, minimum is {:.1}%",
            width * 100.0,
            MIN_RANGE_FRACTION * 100.0
        )));
    }
    Ok(symbol)
}

async fn place_level(
    gateway: &dyn Gateway,
    symbol: &Symbol,
    side: Side,
    quantity: f64,
    level: f64,
) -> Result<GridOrder, GatewayError> {
    let request = OrderRequest::post_only(symbol, side, quantity, level);
    let order = gateway.place_order(&request).await?;
    log_trade(&order);
    Ok(GridOrder {
        id: order.id,
        price: level,
        quantity,
    })
}

/// Apply one reconciliation pass to `grid`
///
/// Every tracked order missing from `open_ids` is treated as filled and
/// replaced on the nearest opposite level. Works on a snapshot of the tracked
/// orders and swaps the next state in at the end. Placement failures drop the
/// slot for this tick.
pub async fn reconcile_grid(
    gateway: &dyn Gateway,
    grid: &mut GridConfig,
    open_ids: &HashSet<OrderId>,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    if !grid.auto_rebalance {
        return report;
    }

    let buys = grid.buy_orders.clone();
    let sells = grid.sell_orders.clone();
    let mut next_buys = Vec::with_capacity(buys.len());
    let mut next_sells = Vec::with_capacity(sells.len());

    for order in buys {
        if open_ids.contains(&order.id) {
            next_buys.push(order);
            continue;
        }
        report.buys_filled += 1;
        info!(symbol = %grid.symbol, order_id = order.id, price = order.price, "BUY filled");

        let Some(level) = next_level_above(&grid.levels, order.price) else {
            info!(symbol = %grid.symbol, price = order.price, "No grid level above, slot left vacant");
            report.vacated_slots += 1;
            continue;
        };

        match place_level(gateway, &grid.symbol, Side::Sell, order.quantity, level).await {
            Ok(new_order) => {
                let profit = (level - order.price) * order.quantity;
                grid.total_profit += profit;
                grid.trades_executed += 1;
                report.profit += profit;
                report.orders_placed += 1;
                info!(
                    symbol = %grid.symbol,
                    order_id = new_order.id,
                    price = level,
                    "Placed SELL, estimated profit {:.4} USDT",
                    profit
                );
                next_sells.push(new_order);
            }
            Err(e) => {
                report.placement_failures += 1;
                warn!(symbol = %grid.symbol, price = level, "Failed to place SELL: {}", e);
            }
        }
    }

    for order in sells {
        if open_ids.contains(&order.id) {
            next_sells.push(order);
            continue;
        }
        report.sells_filled += 1;
        info!(symbol = %grid.symbol, order_id = order.id, price = order.price, "SELL filled");

        let Some(level) = next_level_below(&grid.levels, order.price) else {
            info!(symbol = %grid.symbol, price = order.price, "No grid level below, slot left vacant");
            report.vacated_slots += 1;
            continue;
        };

        match place_level(gateway, &grid.symbol, Side::Buy, order.quantity, level).await {
            Ok(new_order) => {
                grid.trades_executed += 1;
                report.orders_placed += 1;
                info!(symbol = %grid.symbol, order_id = new_order.id, price = level, "Placed BUY");
                next_buys.push(new_order);
            }
            Err(e) => {
                report.placement_failures += 1;
                warn!(symbol = %grid.symbol, price = level, "Failed to place BUY: {}", e);
            }
        }
    }

    grid.buy_orders = next_buys;
    grid.sell_orders = next_sells;
    report
}

/// Owns every active grid, one per symbol
pub struct GridController {
    gateway: Arc<dyn Gateway>,
    grids: HashMap<Symbol, GridConfig>,
}

impl GridController {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            grids: HashMap::new(),
        }
    }

    pub fn grid(&self, symbol: &Symbol) -> Option<&GridConfig> {
        self.grids.get(symbol)
    }

    pub fn active_symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.grids.keys()
    }

    async fn price_for(&self, symbol: &Symbol) -> StrategyResult<f64> {
        self.gateway
            .current_price(symbol)
            .await
            .map_err(|source| StrategyError::GatewayUnavailable {
                symbol: symbol.clone(),
                source,
            })
    }

    fn ensure_vacant(&self, symbol: &Symbol) -> StrategyResult<()> {
        if self.grids.contains_key(symbol) {
            return Err(StrategyError::configuration(format!(
                "A grid is already active for {}",
                symbol
            )));
        }
        Ok(())
    }

    /// Lay out a new grid and place its initial orders
    pub async fn create(
        &mut self,
        symbol: &str,
        params: GridParams,
    ) -> StrategyResult<&GridConfig> {
        let symbol = check_params(symbol, &params)?;
        self.ensure_vacant(&symbol)?;

        let current_price = self.price_for(&symbol).await?;
        if current_price < params.lower_price || current_price > params.upper_price {
            return Err(StrategyError::configuration(format!(
                "Current price {} of {} is outside the grid range {} - {}",
                current_price, symbol, params.lower_price, params.upper_price
            )));
        }

        let levels = grid_levels(params.lower_price, params.upper_price, params.num_grids);
        let capital = capital_estimate(&levels, params.quantity_per_level, current_price);

        info!(
            symbol = %symbol,
            current_price,
            lower = params.lower_price,
            upper = params.upper_price,
            grids = params.num_grids,
            quantity = params.quantity_per_level,
            "Setting up grid"
        );
        debug!(symbol = %symbol, "Grid levels: {:?}", levels);
        info!(symbol = %symbol, "Estimated capital required: {:.2} USDT", capital);

        let mut buy_orders = Vec::new();
        let mut sell_orders = Vec::new();
        let mut last_error = None;

        for &level in &levels {
            let side = if level < current_price {
                Side::Buy
            } else if level > current_price {
                Side::Sell
            } else {
                debug!(symbol = %symbol, level, "Level at market price, nothing placed");
                continue;
            };

            match place_level(
                self.gateway.as_ref(),
                &symbol,
                side,
                params.quantity_per_level,
                level,
            )
            .await
            {
                Ok(order) if side == Side::Buy => buy_orders.push(order),
                Ok(order) => sell_orders.push(order),
                Err(e) => {
                    warn!(symbol = %symbol, side = %side, price = level, "Grid order failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        if buy_orders.is_empty() && sell_orders.is_empty() {
            if let Some(e) = last_error {
                return Err(StrategyError::gateway(&symbol, "place grid orders", e));
            }
        }

        info!(
            symbol = %symbol,
            buys = buy_orders.len(),
            sells = sell_orders.len(),
            "Grid setup complete"
        );

        let config = GridConfig {
            symbol: symbol.clone(),
            lower_price: params.lower_price,
            upper_price: params.upper_price,
            levels,
            quantity_per_level: params.quantity_per_level,
            buy_orders,
            sell_orders,
            auto_rebalance: params.auto_rebalance,
            total_profit: 0.0,
            trades_executed: 0,
            created_at: Utc::now(),
            entry_price: current_price,
            capital_estimate: capital,
        };
        let config: &GridConfig = self.grids.entry(symbol).or_insert(config);
        Ok(config)
    }

    /// Rebuild a grid from orders already resting on the exchange
    ///
    /// Nothing is placed. Open limit orders whose price sits on one of the
    /// grid levels are taken over; everything else on the symbol is ignored.
    pub async fn adopt(
        &mut self,
        symbol: &str,
        params: GridParams,
    ) -> StrategyResult<&GridConfig> {
        let symbol = check_params(symbol, &params)?;
        self.ensure_vacant(&symbol)?;

        let current_price = self.price_for(&symbol).await?;
        let open_orders = self
            .gateway
            .open_orders(&symbol)
            .await
            .map_err(|source| StrategyError::GatewayUnavailable {
                symbol: symbol.clone(),
                source,
            })?;

        let levels = grid_levels(params.lower_price, params.upper_price, params.num_grids);
        let step = grid_step(params.lower_price, params.upper_price, params.num_grids);

        let mut buy_orders = Vec::new();
        let mut sell_orders = Vec::new();
        for order in open_orders.iter().filter(|o| o.order_type == OrderType::Limit) {
            let Some(level) = order.price.and_then(|p| matching_level(&levels, step, p)) else {
                continue;
            };
            let grid_order = GridOrder {
                id: order.id,
                price: level,
                quantity: order.quantity - order.executed_quantity,
            };
            match order.side {
                Side::Buy => buy_orders.push(grid_order),
                Side::Sell => sell_orders.push(grid_order),
            }
        }

        if buy_orders.is_empty() && sell_orders.is_empty() {
            return Err(StrategyError::configuration(format!(
                "No open orders on {} match the grid levels",
                symbol
            )));
        }

        info!(
            symbol = %symbol,
            buys = buy_orders.len(),
            sells = sell_orders.len(),
            ignored = open_orders.len() - buy_orders.len() - sell_orders.len(),
            "Adopted existing grid orders"
        );

        let config = GridConfig {
            symbol: symbol.clone(),
            lower_price: params.lower_price,
            upper_price: params.upper_price,
            capital_estimate: capital_estimate(&levels, params.quantity_per_level, current_price),
            levels,
            quantity_per_level: params.quantity_per_level,
            buy_orders,
            sell_orders,
            auto_rebalance: params.auto_rebalance,
            total_profit: 0.0,
            trades_executed: 0,
            created_at: Utc::now(),
            entry_price: current_price,
        };
        let config: &GridConfig = self.grids.entry(symbol).or_insert(config);
        Ok(config)
    }

    /// One reconciliation pass against a snapshot of open order ids
    pub async fn reconcile(
        &mut self,
        symbol: &Symbol,
        open_ids: &HashSet<OrderId>,
    ) -> StrategyResult<ReconcileReport> {
        let grid = self
            .grids
            .get_mut(symbol)
            .ok_or_else(|| StrategyError::UnknownGrid(symbol.clone()))?;
        Ok(reconcile_grid(self.gateway.as_ref(), grid, open_ids).await)
    }

    /// Poll and rebalance until cancelled or `max_runtime` elapses
    pub async fn monitor(
        &mut self,
        symbol: &Symbol,
        interval: Duration,
        max_runtime: Option<Duration>,
        token: &CancellationToken,
    ) -> StrategyResult<GridSummary> {
        if !self.grids.contains_key(symbol) {
            return Err(StrategyError::UnknownGrid(symbol.clone()));
        }

        info!(
            symbol = %symbol,
            interval_secs = interval.as_secs(),
            max_runtime_secs = max_runtime.map(|d| d.as_secs()),
            "Grid monitoring started"
        );

        let started = Instant::now();
        let mut iterations = 0u64;

        let exit = loop {
            if token.is_cancelled() {
                break MonitorExit::Cancelled;
            }
            if max_runtime.is_some_and(|max| started.elapsed() >= max) {
                info!(symbol = %symbol, "Maximum runtime reached");
                break MonitorExit::MaxRuntime;
            }

            iterations += 1;
            debug!(symbol = %symbol, iteration = iterations, "Checking grid status");

            let fetched = self.gateway.open_orders(symbol).await;
            match fetched {
                Ok(orders) => {
                    let open_ids: HashSet<OrderId> = orders.iter().map(|o| o.id).collect();
                    let report = self.reconcile(symbol, &open_ids).await?;
                    if report.fills() > 0 {
                        debug!(symbol = %symbol, ?report, "Reconciled fills");
                    }
                    self.log_status(symbol);
                }
                Err(e) => {
                    warn!(symbol = %symbol, "Failed to fetch open orders, skipping tick: {}", e);
                }
            }

            let wait = match max_runtime {
                Some(max) => interval.min(max.saturating_sub(started.elapsed())),
                None => interval,
            };
            if pause(token, wait).await {
                break MonitorExit::Cancelled;
            }
        };

        let grid = self
            .grids
            .get(symbol)
            .ok_or_else(|| StrategyError::UnknownGrid(symbol.clone()))?;
        let summary = GridSummary {
            symbol: symbol.clone(),
            runtime: started.elapsed(),
            iterations,
            trades_executed: grid.trades_executed,
            total_profit: grid.total_profit,
            active_buys: grid.buy_orders.len(),
            active_sells: grid.sell_orders.len(),
            exit,
        };

        info!(
            symbol = %symbol,
            runtime_secs = summary.runtime.as_secs(),
            trades = summary.trades_executed,
            profit = summary.total_profit,
            "Grid monitoring stopped"
        );
        Ok(summary)
    }

    fn log_status(&self, symbol: &Symbol) {
        if let Some(grid) = self.grids.get(symbol) {
            info!(
                symbol = %symbol,
                buys = grid.buy_orders.len(),
                sells = grid.sell_orders.len(),
                trades = grid.trades_executed,
                "Grid status, estimated profit {:.2} USDT",
                grid.total_profit
            );
        }
    }

    /// Cancel every open order on the symbol and forget the grid
    ///
    /// The grid is discarded even when the cancel fails.
    pub async fn stop(&mut self, symbol: &str) -> StrategyResult<GridStopOutcome> {
        let symbol = validate_symbol(symbol)?;
        info!(symbol = %symbol, "Stopping grid");

        let orders_cancelled = match self.gateway.cancel_all_orders(&symbol).await {
            Ok(()) => {
                info!(symbol = %symbol, "All grid orders cancelled");
                true
            }
            Err(e) => {
                warn!(symbol = %symbol, "Failed to cancel grid orders: {}", e);
                false
            }
        };

        Ok(GridStopOutcome {
            config: self.grids.remove(&symbol),
            orders_cancelled,
        })
    }
}
