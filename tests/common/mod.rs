//! Scripted in-memory exchange shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_strategies::gateway::Gateway;
use futures_strategies::{
    GatewayError, Order, OrderId, OrderRequest, OrderStatus, OrderType, Position, PositionSide,
    Symbol, TimeInForce,
};

/// Error code used for injected rejections
pub const REJECT_CODE: i64 = -2010;

#[derive(Default)]
struct State {
    next_id: OrderId,
    prices: HashMap<Symbol, f64>,
    open: Vec<Order>,
    positions: Vec<Position>,

    placed: Vec<OrderRequest>,
    place_attempts: usize,
    cancelled: Vec<OrderId>,
    cancel_all_calls: usize,
    open_order_calls: usize,

    fail_place_at: HashSet<usize>,
    fail_order_types: HashSet<OrderType>,
    fail_all_places: bool,
    fail_cancels: bool,
    fail_cancel_all: bool,
    fail_open_orders: bool,
    fail_price: bool,
    fail_positions: bool,
}

/// Fake exchange: resting orders live in memory until a test fills them
///
/// Market and IOC orders fill immediately at the current price (IOC at its
/// limit); everything else rests on the book with status NEW.
#[derive(Clone, Default)]
pub struct FakeGateway {
    state: Arc<Mutex<State>>,
}

fn rejected(message: &str) -> GatewayError {
    GatewayError::Rejected {
        code: REJECT_CODE,
        message: message.to_string(),
    }
}

impl FakeGateway {
    pub fn new() -> Self {
        let gateway = Self::default();
        gateway.state().next_id = 1000;
        gateway
    }

    pub fn with_price(symbol: &str, price: f64) -> Self {
        let gateway = Self::new();
        gateway.set_price(symbol, price);
        gateway
    }

    pub fn handle(&self) -> Arc<dyn Gateway> {
        Arc::new(self.clone())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    // -- scripting --

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.state().prices.insert(Symbol::new(symbol), price);
    }

    pub fn add_position(&self, position: Position) {
        self.state().positions.push(position);
    }

    /// Put an order on the book as if it had been placed elsewhere
    pub fn seed_order(&self, request: &OrderRequest) -> OrderId {
        let mut state = self.state();
        let order = resting_order(&mut state, request);
        let id = order.id;
        state.open.push(order);
        id
    }

    /// Fail the `n`th placement attempt (1-based, counting every attempt)
    pub fn fail_placement(&self, n: usize) {
        self.state().fail_place_at.insert(n);
    }

    pub fn fail_order_type(&self, order_type: OrderType) {
        self.state().fail_order_types.insert(order_type);
    }

    pub fn fail_all_placements(&self, fail: bool) {
        self.state().fail_all_places = fail;
    }

    pub fn fail_cancels(&self, fail: bool) {
        self.state().fail_cancels = fail;
    }

    pub fn fail_cancel_all(&self, fail: bool) {
        self.state().fail_cancel_all = fail;
    }

    pub fn fail_open_orders(&self, fail: bool) {
        self.state().fail_open_orders = fail;
    }

    pub fn fail_price(&self, fail: bool) {
        self.state().fail_price = fail;
    }

    pub fn fail_positions(&self, fail: bool) {
        self.state().fail_positions = fail;
    }

    /// Remove an order from the book as if it had filled
    pub fn fill(&self, id: OrderId) -> Option<Order> {
        let mut state = self.state();
        let index = state.open.iter().position(|o| o.id == id)?;
        Some(state.open.remove(index))
    }

    /// Fill the resting order at `price` on `side`
    pub fn fill_at(&self, side: futures_strategies::Side, price: f64) -> Option<OrderId> {
        let id = self
            .state()
            .open
            .iter()
            .find(|o| o.side == side && o.price == Some(price))
            .map(|o| o.id)?;
        self.fill(id).map(|o| o.id)
    }

    // -- inspection --

    pub fn open(&self) -> Vec<Order> {
        self.state().open.clone()
    }

    pub fn open_ids(&self) -> HashSet<OrderId> {
        self.state().open.iter().map(|o| o.id).collect()
    }

    pub fn placed(&self) -> Vec<OrderRequest> {
        self.state().placed.clone()
    }

    pub fn place_attempts(&self) -> usize {
        self.state().place_attempts
    }

    pub fn cancelled(&self) -> Vec<OrderId> {
        self.state().cancelled.clone()
    }

    pub fn cancel_all_calls(&self) -> usize {
        self.state().cancel_all_calls
    }

    pub fn open_order_calls(&self) -> usize {
        self.state().open_order_calls
    }
}

fn resting_order(state: &mut State, request: &OrderRequest) -> Order {
    state.next_id += 1;
    Order {
        id: state.next_id,
        symbol: request.symbol.clone(),
        side: request.side,
        order_type: request.order_type,
        quantity: request.quantity,
        price: request.price,
        stop_price: request.stop_price,
        status: OrderStatus::New,
        executed_quantity: 0.0,
        average_price: None,
        time_in_force: request.time_in_force,
        reduce_only: request.reduce_only,
        updated_at: Utc::now(),
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn place_order(&self, request: &OrderRequest) -> Result<Order, GatewayError> {
        let mut state = self.state();
        state.place_attempts += 1;
        let attempt = state.place_attempts;

        if state.fail_all_places
            || state.fail_place_at.contains(&attempt)
            || state.fail_order_types.contains(&request.order_type)
        {
            return Err(rejected("Order would immediately trigger"));
        }
        state.placed.push(request.clone());

        let mut order = resting_order(&mut state, request);
        let market = state.prices.get(&request.symbol).copied();

        let immediate = match request.order_type {
            OrderType::Market => market,
            OrderType::Limit if request.time_in_force == Some(TimeInForce::IOC) => request.price,
            _ => None,
        };
        match immediate {
            Some(fill_price) => {
                order.status = OrderStatus::Filled;
                order.executed_quantity = request.quantity;
                order.average_price = Some(fill_price);
            }
            None => state.open.push(order.clone()),
        }
        Ok(order)
    }

    async fn cancel_order(&self, _symbol: &Symbol, order_id: OrderId) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.cancelled.push(order_id);
        if state.fail_cancels {
            return Err(GatewayError::Transport("connection reset".into()));
        }
        match state.open.iter().position(|o| o.id == order_id) {
            Some(index) => {
                state.open.remove(index);
                Ok(())
            }
            None => Err(GatewayError::Rejected {
                code: -2011,
                message: "Unknown order sent.".into(),
            }),
        }
    }

    async fn cancel_all_orders(&self, symbol: &Symbol) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.cancel_all_calls += 1;
        if state.fail_cancel_all {
            return Err(GatewayError::Transport("connection reset".into()));
        }
        state.open.retain(|o| &o.symbol != symbol);
        Ok(())
    }

    async fn open_orders(&self, symbol: &Symbol) -> Result<Vec<Order>, GatewayError> {
        let mut state = self.state();
        state.open_order_calls += 1;
        if state.fail_open_orders {
            return Err(GatewayError::Transport("timed out".into()));
        }
        Ok(state
            .open
            .iter()
            .filter(|o| &o.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn current_price(&self, symbol: &Symbol) -> Result<f64, GatewayError> {
        let state = self.state();
        if state.fail_price {
            return Err(GatewayError::Transport("timed out".into()));
        }
        state
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| rejected("Invalid symbol."))
    }

    async fn open_positions(&self) -> Result<Vec<Position>, GatewayError> {
        let state = self.state();
        if state.fail_positions {
            return Err(GatewayError::Transport("timed out".into()));
        }
        Ok(state.positions.clone())
    }
}

pub fn one_way_position(symbol: &str, amount: f64, entry_price: f64) -> Position {
    Position {
        symbol: Symbol::new(symbol),
        position_side: PositionSide::Both,
        amount,
        entry_price,
        mark_price: entry_price,
        unrealized_pnl: 0.0,
    }
}
