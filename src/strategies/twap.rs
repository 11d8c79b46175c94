//! Time-weighted average price execution
//!
//! Splits a parent quantity into chunks and sends them one at a time with a
//! wait in between. Chunk sizes and waits can be randomized. Limit chunks are
//! re-priced against the market before each send and go out as IOC so nothing
//! is left resting.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::schedule::pause;
use crate::error::{StrategyError, StrategyResult};
use crate::gateway::Gateway;
use crate::orders::log_trade;
use crate::types::{Order, OrderRequest, Side, Symbol, TimeInForce};
use crate::validation::{validate_price, validate_quantity, validate_symbol};

pub const MAX_ORDERS: usize = 100;

/// Fraction of the remaining quantity a randomized chunk may take at most
const MAX_CHUNK_SHARE: f64 = 0.8;

/// Timing jitter, as a fraction of the base interval
const WAIT_JITTER: f64 = 0.2;

/// Nudge applied to the market price for limit chunks
const LIMIT_NUDGE: f64 = 0.001;

/// How each chunk is priced
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TwapPricing {
    Market,
    /// Never pay more (buy) or receive less (sell) than this price
    Limit(f64),
}

/// Parameters of one TWAP run
#[derive(Debug, Clone, PartialEq)]
pub struct TwapRequest {
    pub symbol: String,
    pub side: Side,
    pub total_quantity: f64,
    pub num_orders: usize,
    pub interval_secs: u64,
    pub pricing: TwapPricing,
    pub randomize_timing: bool,
    pub randomize_quantity: bool,
}

/// Outcome of a TWAP run
#[derive(Debug, Clone)]
pub struct TwapReport {
    pub symbol: Symbol,
    pub side: Side,
    pub target_quantity: f64,
    pub planned: usize,
    pub executed_orders: Vec<Order>,
    pub failed_chunks: usize,
    pub interrupted: bool,
}

impl TwapReport {
    pub fn executed_quantity(&self) -> f64 {
        self.executed_orders.iter().map(|o| o.executed_quantity).sum()
    }

    /// Executed share of the target, 0.0 to 1.0
    pub fn fill_rate(&self) -> f64 {
        if self.target_quantity <= 0.0 {
            return 0.0;
        }
        self.executed_quantity() / self.target_quantity
    }

    /// Volume-weighted average fill price, `None` when nothing filled
    pub fn vwap(&self) -> Option<f64> {
        let filled = self.executed_quantity();
        if filled <= 0.0 {
            return None;
        }
        let notional: f64 = self.executed_orders.iter().map(Order::filled_notional).sum();
        Some(notional / filled)
    }

    pub fn is_complete(&self) -> bool {
        !self.interrupted && self.executed_orders.len() == self.planned
    }
}

/// Split `total` into `num_orders` chunks whose sum is `total`
///
/// Randomized chunks are drawn from 50%-150% of the average of what remains,
/// capped at 80% of the remainder. The last chunk takes the remainder.
pub fn chunk_sizes<R: Rng>(
    total: f64,
    num_orders: usize,
    randomize: bool,
    rng: &mut R,
) -> Vec<f64> {
    if num_orders == 0 {
        return Vec::new();
    }

    let mut sizes = Vec::with_capacity(num_orders);
    let mut remaining = total;

    for i in 0..num_orders - 1 {
        let average = remaining / (num_orders - i) as f64;
        let size = if randomize {
            let draw: f64 = rng.gen_range(average * 0.5..=average * 1.5);
            draw.min(remaining * MAX_CHUNK_SHARE)
        } else {
            total / num_orders as f64
        };
        sizes.push(size);
        remaining -= size;
    }
    sizes.push(remaining);
    sizes
}

/// Wait before the next chunk: the base interval, or ±20% around it when
/// randomized, in whole seconds and never under one second
pub fn jittered_wait<R: Rng>(base_secs: u64, randomize: bool, rng: &mut R) -> Duration {
    if !randomize {
        return Duration::from_secs(base_secs);
    }
    let base = base_secs as f64;
    let variance = base * WAIT_JITTER;
    let offset: f64 = rng.gen_range(-variance..=variance);
    let wait = base + offset;
    Duration::from_secs((wait.floor() as u64).max(1))
}

/// Working price of a limit chunk
///
/// Moves toward the market to improve the fill chance without crossing the
/// caller's limit. Falls back to the limit when no market price is known.
pub fn adaptive_limit_price(side: Side, limit: f64, market: Option<f64>) -> f64 {
    match (side, market) {
        (_, None) => limit,
        (Side::Buy, Some(market)) => limit.min(market * (1.0 + LIMIT_NUDGE)),
        (Side::Sell, Some(market)) => limit.max(market * (1.0 - LIMIT_NUDGE)),
    }
}

/// Runs TWAP schedules
pub struct TwapController {
    gateway: Arc<dyn Gateway>,
    rng: StdRng,
}

impl TwapController {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic randomization, for tests and replays
    pub fn with_seed(gateway: Arc<dyn Gateway>, seed: u64) -> Self {
        Self {
            gateway,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Execute the schedule
    ///
    /// Failed chunks are logged and skipped. Cancelling `token` stops the run
    /// after the chunk in flight; the report is then flagged `interrupted`.
    pub async fn execute(
        &mut self,
        request: &TwapRequest,
        token: &CancellationToken,
    ) -> StrategyResult<TwapReport> {
        let symbol = validate_symbol(&request.symbol)?;
        let total = validate_quantity(request.total_quantity)?;
        if !(1..=MAX_ORDERS).contains(&request.num_orders) {
            return Err(StrategyError::configuration(format!(
                "Number of orders must be between 1 and {}, got {}",
                MAX_ORDERS, request.num_orders
            )));
        }
        if request.interval_secs < 1 {
            return Err(StrategyError::configuration(
                "Interval must be at least 1 second",
            ));
        }
        if let TwapPricing::Limit(price) = request.pricing {
            validate_price(price)?;
        }

        let side = request.side;
        let sizes = chunk_sizes(
            total,
            request.num_orders,
            request.randomize_quantity,
            &mut self.rng,
        );

        info!(
            symbol = %symbol,
            side = %side,
            quantity = total,
            orders = request.num_orders,
            interval_secs = request.interval_secs,
            pricing = ?request.pricing,
            randomize_timing = request.randomize_timing,
            randomize_quantity = request.randomize_quantity,
            "Starting TWAP"
        );
        debug!(symbol = %symbol, "Chunk sizes: {:?}", sizes);

        let mut report = TwapReport {
            symbol: symbol.clone(),
            side,
            target_quantity: total,
            planned: sizes.len(),
            executed_orders: Vec::with_capacity(sizes.len()),
            failed_chunks: 0,
            interrupted: false,
        };

        let last = sizes.len() - 1;
        for (i, &size) in sizes.iter().enumerate() {
            if token.is_cancelled() {
                report.interrupted = true;
                break;
            }

            let order_request = match request.pricing {
                TwapPricing::Market => OrderRequest::market(&symbol, side, size),
                TwapPricing::Limit(limit) => {
                    let market = match self.gateway.current_price(&symbol).await {
                        Ok(price) => Some(price),
                        Err(e) => {
                            warn!(
                                symbol = %symbol,
                                "Price lookup failed, using requested limit: {}",
                                e
                            );
                            None
                        }
                    };
                    let price = adaptive_limit_price(side, limit, market);
                    OrderRequest::limit(&symbol, side, size, price, TimeInForce::IOC)
                }
            };

            info!(
                symbol = %symbol,
                chunk = i + 1,
                of = sizes.len(),
                quantity = size,
                price = order_request.price,
                "Sending TWAP chunk"
            );

            match self.gateway.place_order(&order_request).await {
                Ok(order) => {
                    log_trade(&order);
                    report.executed_orders.push(order);
                }
                Err(e) => {
                    report.failed_chunks += 1;
                    warn!(symbol = %symbol, chunk = i + 1, "TWAP chunk failed, continuing: {}", e);
                }
            }

            if i < last {
                let wait =
                    jittered_wait(request.interval_secs, request.randomize_timing, &mut self.rng);
                debug!(symbol = %symbol, wait_secs = wait.as_secs(), "Waiting for next chunk");
                if pause(token, wait).await {
                    report.interrupted = true;
                    break;
                }
            }
        }

        if report.interrupted {
            warn!(
                symbol = %symbol,
                executed = report.executed_orders.len(),
                planned = report.planned,
                "TWAP interrupted"
            );
        }
        info!(
            symbol = %symbol,
            orders = report.executed_orders.len(),
            failed = report.failed_chunks,
            executed_quantity = report.executed_quantity(),
            fill_rate_pct = report.fill_rate() * 100.0,
            vwap = report.vwap(),
            "TWAP finished"
        );
        Ok(report)
    }
}
