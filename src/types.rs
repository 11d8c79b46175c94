//! Core data types used across the trading system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Exchange-assigned order identifier
pub type OrderId = u64;

/// Trading pair symbol (e.g. `BTCUSDT`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side that closes a position opened on `self`
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(format!("Invalid side: {}. Must be BUY or SELL", other)),
        }
    }
}

/// Futures order type, named as the exchange names them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    /// Stop-limit: becomes a limit order once `stop_price` trades
    Stop,
    StopMarket,
    TakeProfit,
    TakeProfitMarket,
    TrailingStopMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::Stop => "STOP",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            OrderType::TrailingStopMarket => "TRAILING_STOP_MARKET",
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-in-force specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good till cancelled
    GTC,
    /// Immediate or cancel
    IOC,
    /// Fill or kill
    FOK,
    /// Good till crossing (post-only, maker only)
    GTX,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::GTC => "GTC",
            TimeInForce::IOC => "IOC",
            TimeInForce::FOK => "FOK",
            TimeInForce::GTX => "GTX",
        }
    }
}

impl FromStr for TimeInForce {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GTC" => Ok(TimeInForce::GTC),
            "IOC" => Ok(TimeInForce::IOC),
            "FOK" => Ok(TimeInForce::FOK),
            "GTX" => Ok(TimeInForce::GTX),
            other => Err(format!(
                "Invalid timeInForce: {}. Must be one of GTC, IOC, FOK, GTX",
                other
            )),
        }
    }
}

/// Order status as reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    ExpiredInMatch,
}

impl OrderStatus {
    /// Whether the order can still trade
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled)
    }
}

/// Hedge-mode position side; one-way accounts always use `Both`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Both,
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Both => "BOTH",
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }
}

impl FromStr for PositionSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BOTH" => Ok(PositionSide::Both),
            "LONG" => Ok(PositionSide::Long),
            "SHORT" => Ok(PositionSide::Short),
            other => Err(format!(
                "Invalid position side: {}. Must be BOTH, LONG or SHORT",
                other
            )),
        }
    }
}

/// Price source used to trigger stop orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkingType {
    ContractPrice,
    MarkPrice,
}

impl WorkingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkingType::ContractPrice => "CONTRACT_PRICE",
            WorkingType::MarkPrice => "MARK_PRICE",
        }
    }
}

/// An order as known by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    /// Limit price; `None` for market and stop-market orders
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    pub status: OrderStatus,
    pub executed_quantity: f64,
    pub average_price: Option<f64>,
    pub time_in_force: Option<TimeInForce>,
    pub reduce_only: bool,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Notional value of the filled part of the order
    pub fn filled_notional(&self) -> f64 {
        self.executed_quantity * self.average_price.unwrap_or(0.0)
    }
}

/// Parameters for a new order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    pub time_in_force: Option<TimeInForce>,
    pub reduce_only: bool,
    pub position_side: Option<PositionSide>,
    /// Trailing distance in percent (0.1 = 0.1%)
    pub callback_rate: Option<f64>,
    pub activation_price: Option<f64>,
    pub working_type: Option<WorkingType>,
}

impl OrderRequest {
    fn base(symbol: &Symbol, side: Side, order_type: OrderType, quantity: f64) -> Self {
        Self {
            symbol: symbol.clone(),
            side,
            order_type,
            quantity,
            price: None,
            stop_price: None,
            time_in_force: None,
            reduce_only: false,
            position_side: None,
            callback_rate: None,
            activation_price: None,
            working_type: None,
        }
    }

    /// Create a market order request
    pub fn market(symbol: &Symbol, side: Side, quantity: f64) -> Self {
        Self::base(symbol, side, OrderType::Market, quantity)
    }

    /// Create a limit order request
    pub fn limit(
        symbol: &Symbol,
        side: Side,
        quantity: f64,
        price: f64,
        time_in_force: TimeInForce,
    ) -> Self {
        Self {
            price: Some(price),
            time_in_force: Some(time_in_force),
            ..Self::base(symbol, side, OrderType::Limit, quantity)
        }
    }

    /// Maker-only limit order; rejected instead of crossing the book
    pub fn post_only(symbol: &Symbol, side: Side, quantity: f64, price: f64) -> Self {
        Self::limit(symbol, side, quantity, price, TimeInForce::GTX)
    }

    /// Stop-limit order
    pub fn stop_limit(
        symbol: &Symbol,
        side: Side,
        quantity: f64,
        stop_price: f64,
        limit_price: f64,
    ) -> Self {
        Self {
            price: Some(limit_price),
            stop_price: Some(stop_price),
            time_in_force: Some(TimeInForce::GTC),
            working_type: Some(WorkingType::ContractPrice),
            ..Self::base(symbol, side, OrderType::Stop, quantity)
        }
    }

    /// Stop-market order
    pub fn stop_market(symbol: &Symbol, side: Side, quantity: f64, stop_price: f64) -> Self {
        Self {
            stop_price: Some(stop_price),
            working_type: Some(WorkingType::ContractPrice),
            ..Self::base(symbol, side, OrderType::StopMarket, quantity)
        }
    }

    /// Trailing stop; `callback_rate` is in percent
    pub fn trailing_stop(
        symbol: &Symbol,
        side: Side,
        quantity: f64,
        callback_rate: f64,
        activation_price: Option<f64>,
    ) -> Self {
        Self {
            callback_rate: Some(callback_rate),
            activation_price,
            ..Self::base(symbol, side, OrderType::TrailingStopMarket, quantity)
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    pub fn with_position_side(mut self, position_side: PositionSide) -> Self {
        self.position_side = Some(position_side);
        self
    }
}

/// Open futures position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub position_side: PositionSide,
    /// Signed size: positive for long, negative for short
    pub amount: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.amount > 0.0
    }

    pub fn size(&self) -> f64 {
        self.amount.abs()
    }

    /// Side of the order that closes this position
    pub fn exit_side(&self) -> Side {
        if self.is_long() {
            Side::Sell
        } else {
            Side::Buy
        }
    }
}
