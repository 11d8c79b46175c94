//! One-cancels-other exits
//!
//! Binance futures has no native OCO, so a pair is simulated with a reduce-only
//! take-profit limit and a reduce-only stop-market, plus a poll loop that
//! cancels the survivor once either leg leaves the book.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::schedule::pause;
use super::MonitorExit;
use crate::error::{StrategyError, StrategyResult};
use crate::gateway::Gateway;
use crate::orders::log_trade;
use crate::types::{OrderId, OrderRequest, Position, PositionSide, Side, Symbol, TimeInForce};
use crate::validation::{validate_percentage, validate_price, validate_quantity, validate_symbol};

/// A tracked take-profit / stop-loss pair
#[derive(Debug, Clone, PartialEq)]
pub struct OcoGroup {
    pub symbol: Symbol,
    pub take_profit_order_id: OrderId,
    pub stop_loss_order_id: OrderId,
    pub created_at: DateTime<Utc>,
}

/// Observed state of a pair at one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcoState {
    BothOpen,
    /// Take-profit left the book, stop-loss still resting
    TakeProfitFilled,
    /// Stop-loss left the book, take-profit still resting
    StopLossFilled,
    /// Neither leg is open; includes both legs filling within one poll
    BothGone,
}

/// Classify a pair against the open order ids of its symbol
pub fn classify(group: &OcoGroup, open_ids: &HashSet<OrderId>) -> OcoState {
    let tp_open = open_ids.contains(&group.take_profit_order_id);
    let sl_open = open_ids.contains(&group.stop_loss_order_id);
    match (tp_open, sl_open) {
        (true, true) => OcoState::BothOpen,
        (false, true) => OcoState::TakeProfitFilled,
        (true, false) => OcoState::StopLossFilled,
        (false, false) => OcoState::BothGone,
    }
}

/// A pair that reached a terminal state and was dropped from tracking
#[derive(Debug, Clone, PartialEq)]
pub struct OcoResolution {
    pub group: OcoGroup,
    pub state: OcoState,
    /// Outcome of cancelling the surviving leg; `None` when nothing was cancelled
    pub cancelled_survivor: Option<bool>,
}

/// Result of a monitor run
#[derive(Debug, Clone)]
pub struct OcoMonitorOutcome {
    pub resolutions: Vec<OcoResolution>,
    pub exit: MonitorExit,
}

/// Take-profit and stop-loss prices for closing `position`, from percentages
/// of its entry price
pub fn position_exit_prices(
    position: &Position,
    take_profit_pct: f64,
    stop_loss_pct: f64,
) -> (f64, f64) {
    let entry = position.entry_price;
    if position.is_long() {
        (
            entry * (1.0 + take_profit_pct / 100.0),
            entry * (1.0 - stop_loss_pct / 100.0),
        )
    } else {
        (
            entry * (1.0 - take_profit_pct / 100.0),
            entry * (1.0 + stop_loss_pct / 100.0),
        )
    }
}

/// Open position on `symbol` for `position_side`, if there is one
pub fn find_position<'a>(
    positions: &'a [Position],
    symbol: &Symbol,
    position_side: PositionSide,
) -> Option<&'a Position> {
    positions
        .iter()
        .find(|p| &p.symbol == symbol && p.position_side == position_side && p.amount != 0.0)
}

/// Places and supervises OCO pairs
pub struct OcoController {
    gateway: Arc<dyn Gateway>,
    groups: Vec<OcoGroup>,
}

impl OcoController {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            groups: Vec::new(),
        }
    }

    pub fn groups(&self) -> &[OcoGroup] {
        &self.groups
    }

    pub fn has_groups(&self, symbol: &Symbol) -> bool {
        self.groups.iter().any(|g| &g.symbol == symbol)
    }

    /// Place a take-profit and stop-loss pair on the exit `side`
    ///
    /// If the stop-loss cannot be placed the take-profit is cancelled and the
    /// call fails with [`StrategyError::PartialPlacementRollback`].
    pub async fn execute(
        &mut self,
        symbol: &str,
        side: Side,
        quantity: f64,
        take_profit: f64,
        stop_loss: f64,
        position_side: PositionSide,
    ) -> StrategyResult<OcoGroup> {
        let symbol = validate_symbol(symbol)?;
        let quantity = validate_quantity(quantity)?;
        let take_profit = validate_price(take_profit)?;
        let stop_loss = validate_price(stop_loss)?;

        self.warn_on_price_sides(&symbol, side, take_profit, stop_loss).await;

        info!(
            symbol = %symbol,
            side = %side,
            quantity,
            take_profit,
            stop_loss,
            "Placing OCO pair"
        );

        let tp_request = exit_order(
            OrderRequest::limit(&symbol, side, quantity, take_profit, TimeInForce::GTC),
            position_side,
        );
        let tp_order = self
            .gateway
            .place_order(&tp_request)
            .await
            .map_err(|e| StrategyError::gateway(&symbol, "place take-profit", e))?;
        log_trade(&tp_order);

        let sl_request = exit_order(
            OrderRequest::stop_market(&symbol, side, quantity, stop_loss),
            position_side,
        );
        let sl_order = match self.gateway.place_order(&sl_request).await {
            Ok(order) => order,
            Err(source) => {
                warn!(
                    symbol = %symbol,
                    order_id = tp_order.id,
                    "Stop-loss placement failed, cancelling take-profit: {}",
                    source
                );
                let rolled_back = match self.gateway.cancel_order(&symbol, tp_order.id).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!(
                            symbol = %symbol,
                            order_id = tp_order.id,
                            "Take-profit rollback failed, order left resting: {}",
                            e
                        );
                        false
                    }
                };
                return Err(StrategyError::PartialPlacementRollback {
                    symbol,
                    failed_leg: "stop-loss",
                    placed_order_id: tp_order.id,
                    rolled_back,
                    source,
                });
            }
        };
        log_trade(&sl_order);

        let group = OcoGroup {
            symbol: symbol.clone(),
            take_profit_order_id: tp_order.id,
            stop_loss_order_id: sl_order.id,
            created_at: Utc::now(),
        };
        info!(
            symbol = %symbol,
            take_profit_id = group.take_profit_order_id,
            stop_loss_id = group.stop_loss_order_id,
            "OCO pair placed"
        );
        self.groups.push(group.clone());
        Ok(group)
    }

    /// Protect an open position with percentage-based exits from its entry price
    pub async fn execute_for_position(
        &mut self,
        symbol: &str,
        take_profit_pct: f64,
        stop_loss_pct: f64,
        position_side: PositionSide,
    ) -> StrategyResult<OcoGroup> {
        let symbol = validate_symbol(symbol)?;
        let take_profit_pct = validate_percentage(take_profit_pct, 0.01, 1000.0)?;
        let stop_loss_pct = validate_percentage(stop_loss_pct, 0.01, 100.0)?;

        let positions = self
            .gateway
            .open_positions()
            .await
            .map_err(|source| StrategyError::GatewayUnavailable {
                symbol: symbol.clone(),
                source,
            })?;

        let Some(position) = find_position(&positions, &symbol, position_side) else {
            return Err(StrategyError::NoOpenPosition(symbol));
        };

        let (take_profit, stop_loss) =
            position_exit_prices(position, take_profit_pct, stop_loss_pct);
        info!(
            symbol = %symbol,
            amount = position.amount,
            entry_price = position.entry_price,
            "Position found, take-profit {:.4} (+{}%), stop-loss {:.4} (-{}%)",
            take_profit,
            take_profit_pct,
            stop_loss,
            stop_loss_pct
        );

        self.execute(
            symbol.as_str(),
            position.exit_side(),
            position.size(),
            take_profit,
            stop_loss,
            position_side,
        )
        .await
    }

    /// Start tracking a pair that was placed elsewhere
    pub fn track(
        &mut self,
        symbol: &str,
        take_profit_order_id: OrderId,
        stop_loss_order_id: OrderId,
    ) -> StrategyResult<OcoGroup> {
        let symbol = validate_symbol(symbol)?;
        if take_profit_order_id == stop_loss_order_id {
            return Err(StrategyError::configuration(
                "Take-profit and stop-loss order ids must differ",
            ));
        }

        let group = OcoGroup {
            symbol,
            take_profit_order_id,
            stop_loss_order_id,
            created_at: Utc::now(),
        };
        self.groups.push(group.clone());
        Ok(group)
    }

    /// One monitoring tick for `symbol`
    ///
    /// Terminal pairs are removed even when cancelling the survivor fails.
    pub async fn poll(
        &mut self,
        symbol: &Symbol,
        open_ids: &HashSet<OrderId>,
    ) -> Vec<OcoResolution> {
        let (tracked, others): (Vec<OcoGroup>, Vec<OcoGroup>) = std::mem::take(&mut self.groups)
            .into_iter()
            .partition(|g| &g.symbol == symbol);

        let mut remaining = others;
        let mut resolutions = Vec::new();

        for group in tracked {
            let state = classify(&group, open_ids);
            let cancelled_survivor = match state {
                OcoState::BothOpen => {
                    remaining.push(group);
                    continue;
                }
                OcoState::TakeProfitFilled => {
                    info!(
                        symbol = %symbol,
                        order_id = group.take_profit_order_id,
                        "Take-profit filled, cancelling stop-loss"
                    );
                    Some(self.cancel_survivor(symbol, group.stop_loss_order_id).await)
                }
                OcoState::StopLossFilled => {
                    info!(
                        symbol = %symbol,
                        order_id = group.stop_loss_order_id,
                        "Stop-loss triggered, cancelling take-profit"
                    );
                    Some(self.cancel_survivor(symbol, group.take_profit_order_id).await)
                }
                OcoState::BothGone => {
                    warn!(
                        symbol = %symbol,
                        take_profit_id = group.take_profit_order_id,
                        stop_loss_id = group.stop_loss_order_id,
                        "Both legs left the book, dropping pair"
                    );
                    None
                }
            };
            resolutions.push(OcoResolution {
                group,
                state,
                cancelled_survivor,
            });
        }

        self.groups = remaining;
        resolutions
    }

    /// Poll until every pair on `symbol` resolves or the token fires
    pub async fn monitor(
        &mut self,
        symbol: &Symbol,
        interval: Duration,
        token: &CancellationToken,
    ) -> OcoMonitorOutcome {
        info!(
            symbol = %symbol,
            pairs = self.groups.iter().filter(|g| &g.symbol == symbol).count(),
            interval_secs = interval.as_secs(),
            "OCO monitoring started"
        );

        let mut resolutions = Vec::new();
        let exit = loop {
            if token.is_cancelled() {
                break MonitorExit::Cancelled;
            }
            if !self.has_groups(symbol) {
                break MonitorExit::Completed;
            }

            let fetched = self.gateway.open_orders(symbol).await;
            match fetched {
                Ok(orders) => {
                    let open_ids: HashSet<OrderId> = orders.iter().map(|o| o.id).collect();
                    resolutions.extend(self.poll(symbol, &open_ids).await);
                }
                Err(e) => {
                    warn!(symbol = %symbol, "Failed to fetch open orders, skipping tick: {}", e);
                }
            }

            if !self.has_groups(symbol) {
                break MonitorExit::Completed;
            }
            if pause(token, interval).await {
                break MonitorExit::Cancelled;
            }
        };

        info!(symbol = %symbol, resolved = resolutions.len(), ?exit, "OCO monitoring stopped");
        OcoMonitorOutcome { resolutions, exit }
    }

    async fn cancel_survivor(&self, symbol: &Symbol, order_id: OrderId) -> bool {
        match self.gateway.cancel_order(symbol, order_id).await {
            Ok(()) => {
                info!(symbol = %symbol, order_id, "Cancelled remaining leg");
                true
            }
            Err(e) => {
                error!(symbol = %symbol, order_id, "Failed to cancel remaining leg: {}", e);
                false
            }
        }
    }

    async fn warn_on_price_sides(
        &self,
        symbol: &Symbol,
        side: Side,
        take_profit: f64,
        stop_loss: f64,
    ) {
        let market = match self.gateway.current_price(symbol).await {
            Ok(price) => price,
            Err(e) => {
                warn!(symbol = %symbol, "Could not fetch market price: {}", e);
                return;
            }
        };

        // SELL closes a long: profit above market, stop below. BUY mirrors it.
        let (tp_ok, sl_ok) = match side {
            Side::Sell => (take_profit > market, stop_loss < market),
            Side::Buy => (take_profit < market, stop_loss > market),
        };
        if !tp_ok {
            warn!(
                symbol = %symbol,
                side = %side,
                take_profit,
                market,
                "Take-profit is on the wrong side of the market"
            );
        }
        if !sl_ok {
            warn!(
                symbol = %symbol,
                side = %side,
                stop_loss,
                market,
                "Stop-loss is on the wrong side of the market"
            );
        }
    }
}

/// Both legs only close exposure: reduce-only in one-way mode, bound to the
/// position side in hedge mode
fn exit_order(request: OrderRequest, position_side: PositionSide) -> OrderRequest {
    match position_side {
        PositionSide::Both => request.reduce_only(),
        side => request.with_position_side(side),
    }
}
