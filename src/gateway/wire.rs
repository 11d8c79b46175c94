//! Binance USDT-M futures REST payloads
//!
//! Binance sends most numbers as JSON strings; [`de_f64`] accepts both forms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::types::{
    Order, OrderStatus, OrderType, Position, PositionSide, Side, Symbol, TimeInForce,
};

/// Parse a number sent either as a JSON string or a JSON number
pub fn de_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(f64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) if s.is_empty() => Ok(0.0),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Render a price or quantity without float noise (at most 8 decimals)
pub fn format_decimal(value: f64) -> String {
    let text = format!("{:.8}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text.is_empty() || text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// Error body returned with non-2xx responses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    #[serde(deserialize_with = "de_f64")]
    pub price: f64,
}

/// Order as returned by `POST /fapi/v1/order` and `GET /fapi/v1/openOrders`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: u64,
    pub symbol: String,
    pub status: OrderStatus,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(default, deserialize_with = "de_f64")]
    pub price: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub avg_price: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub orig_qty: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub executed_qty: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub stop_price: f64,
    #[serde(default)]
    pub time_in_force: Option<String>,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub update_time: i64,
}

fn non_zero(value: f64) -> Option<f64> {
    (value != 0.0).then_some(value)
}

impl From<OrderResponse> for Order {
    fn from(raw: OrderResponse) -> Self {
        Order {
            id: raw.order_id,
            symbol: Symbol::new(raw.symbol),
            side: raw.side,
            order_type: raw.order_type,
            quantity: raw.orig_qty,
            price: non_zero(raw.price),
            stop_price: non_zero(raw.stop_price),
            status: raw.status,
            executed_quantity: raw.executed_qty,
            average_price: non_zero(raw.avg_price),
            // GTE_GTC and other exchange-internal values carry no meaning here
            time_in_force: raw
                .time_in_force
                .as_deref()
                .and_then(|tif| tif.parse::<TimeInForce>().ok()),
            reduce_only: raw.reduce_only,
            updated_at: DateTime::<Utc>::from_timestamp_millis(raw.update_time)
                .unwrap_or_else(Utc::now),
        }
    }
}

/// Entry of `GET /fapi/v2/positionRisk`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    #[serde(deserialize_with = "de_f64")]
    pub position_amt: f64,
    #[serde(deserialize_with = "de_f64")]
    pub entry_price: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub mark_price: f64,
    #[serde(rename = "unRealizedProfit", default, deserialize_with = "de_f64")]
    pub unrealized_profit: f64,
    #[serde(default = "default_position_side")]
    pub position_side: PositionSide,
}

fn default_position_side() -> PositionSide {
    PositionSide::Both
}

impl From<PositionRisk> for Position {
    fn from(raw: PositionRisk) -> Self {
        Position {
            symbol: Symbol::new(raw.symbol),
            position_side: raw.position_side,
            amount: raw.position_amt,
            entry_price: raw.entry_price,
            mark_price: raw.mark_price,
            unrealized_pnl: raw.unrealized_profit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(0.001), "0.001");
        assert_eq!(format_decimal(95000.0), "95000");
        assert_eq!(format_decimal(0.1 + 0.2), "0.3");
        assert_eq!(format_decimal(1.234567891), "1.23456789");
        assert_eq!(format_decimal(0.0), "0");
    }

    #[test]
    fn test_parse_open_order() {
        let json = r#"{
            "avgPrice": "0.00000",
            "clientOrderId": "abc",
            "cumQuote": "0",
            "executedQty": "0",
            "orderId": 1917641,
            "origQty": "0.40",
            "origType": "TRAILING_STOP_MARKET",
            "price": "0",
            "reduceOnly": false,
            "side": "BUY",
            "positionSide": "SHORT",
            "status": "NEW",
            "stopPrice": "9300",
            "closePosition": false,
            "symbol": "BTCUSDT",
            "time": 1579276756075,
            "timeInForce": "GTC",
            "type": "TRAILING_STOP_MARKET",
            "activatePrice": "9020",
            "priceRate": "0.3",
            "updateTime": 1579276756075,
            "workingType": "CONTRACT_PRICE",
            "priceProtect": false
        }"#;

        let order: Order = serde_json::from_str::<OrderResponse>(json).unwrap().into();
        assert_eq!(order.id, 1917641);
        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.order_type, OrderType::TrailingStopMarket);
        assert_eq!(order.quantity, 0.4);
        assert_eq!(order.price, None);
        assert_eq!(order.stop_price, Some(9300.0));
        assert_eq!(order.average_price, None);
        assert_eq!(order.time_in_force, Some(TimeInForce::GTC));
        assert!(order.status.is_open());
    }

    #[test]
    fn test_unknown_time_in_force_dropped() {
        let json = r#"{"orderId":7,"symbol":"ETHUSDT","status":"NEW","side":"SELL",
            "type":"STOP_MARKET","stopPrice":"2900","origQty":"1","timeInForce":"GTE_GTC"}"#;
        let order: Order = serde_json::from_str::<OrderResponse>(json).unwrap().into();
        assert_eq!(order.time_in_force, None);
        assert_eq!(order.stop_price, Some(2900.0));
    }

    #[test]
    fn test_parse_position() {
        let json = r#"{
            "entryPrice": "6563.66500",
            "marginType": "isolated",
            "isAutoAddMargin": "false",
            "isolatedMargin": "15517.54150468",
            "leverage": "10",
            "liquidationPrice": "5930.78",
            "markPrice": "6679.50671178",
            "maxNotionalValue": "20000000",
            "positionAmt": "-20.000",
            "symbol": "BTCUSDT",
            "unRealizedProfit": "-2316.83423560",
            "positionSide": "BOTH",
            "updateTime": 1625474304765
        }"#;
        let position: Position = serde_json::from_str::<PositionRisk>(json).unwrap().into();
        assert_eq!(position.amount, -20.0);
        assert_eq!(position.exit_side(), Side::Buy);
        assert_eq!(position.position_side, PositionSide::Both);
        assert!((position.unrealized_pnl + 2316.8342356).abs() < 1e-9);
    }
}
