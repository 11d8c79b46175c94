//! Input validation for symbols, sides, quantities and prices
//!
//! Pure functions. Everything here runs before an order reaches the gateway.

use crate::error::ValidationError;
use crate::types::{Side, Symbol};

/// Largest quantity accepted for a single order
pub const MAX_QUANTITY: f64 = 1_000_000.0;

/// Largest price accepted for a single order
pub const MAX_PRICE: f64 = 10_000_000.0;

/// Validate a USDT-M futures symbol and normalise it to upper case
pub fn validate_symbol(symbol: &str) -> Result<Symbol, ValidationError> {
    let symbol = symbol.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(ValidationError::new("Symbol cannot be empty"));
    }

    let base = symbol.strip_suffix("USDT").ok_or_else(|| {
        ValidationError::new(format!(
            "Invalid symbol: {}. Must be a USDT-M futures pair (e.g., BTCUSDT)",
            symbol
        ))
    })?;

    if base.len() < 2 || !base.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::new(format!(
            "Invalid base currency in symbol: {}",
            symbol
        )));
    }

    Ok(Symbol::new(symbol))
}

/// Parse an order side
pub fn validate_side(side: &str) -> Result<Side, ValidationError> {
    if side.trim().is_empty() {
        return Err(ValidationError::new("Side cannot be empty"));
    }
    side.parse::<Side>().map_err(ValidationError)
}

pub fn validate_quantity(quantity: f64) -> Result<f64, ValidationError> {
    if !quantity.is_finite() || quantity <= 0.0 {
        return Err(ValidationError::new(format!(
            "Invalid quantity: {}. Must be greater than 0",
            quantity
        )));
    }
    if quantity > MAX_QUANTITY {
        return Err(ValidationError::new(format!(
            "Quantity too large: {}. Maximum is 1,000,000",
            quantity
        )));
    }
    Ok(quantity)
}

pub fn validate_price(price: f64) -> Result<f64, ValidationError> {
    if !price.is_finite() || price <= 0.0 {
        return Err(ValidationError::new(format!(
            "Invalid price: {}. Must be greater than 0",
            price
        )));
    }
    if price > MAX_PRICE {
        return Err(ValidationError::new(format!(
            "Price too large: {}. Maximum is 10,000,000",
            price
        )));
    }
    Ok(price)
}

/// Validate a percentage within `[min, max]`
pub fn validate_percentage(value: f64, min: f64, max: f64) -> Result<f64, ValidationError> {
    if !value.is_finite() || value < min || value > max {
        return Err(ValidationError::new(format!(
            "Invalid percentage: {}. Must be between {} and {}",
            value, min, max
        )));
    }
    Ok(value)
}

/// Trailing stop callback rate, in percent
pub fn validate_callback_rate(rate: f64) -> Result<f64, ValidationError> {
    if !(0.1..=5.0).contains(&rate) {
        return Err(ValidationError::new(format!(
            "Callback rate must be between 0.1 and 5.0, got {}",
            rate
        )));
    }
    Ok(rate)
}

pub fn validate_leverage(leverage: u32) -> Result<u32, ValidationError> {
    if !(1..=125).contains(&leverage) {
        return Err(ValidationError::new(format!(
            "Invalid leverage: {}. Must be between 1 and 125",
            leverage
        )));
    }
    Ok(leverage)
}
