//! Error types for the gateway, validation layer and strategy controllers

use thiserror::Error;

use crate::types::{OrderId, Symbol};

/// Input rejected before anything reaches the exchange
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        ValidationError(msg.into())
    }
}

/// Failure talking to the exchange
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// The exchange received the request and refused it
    #[error("rejected by exchange (code {code}): {message}")]
    Rejected { code: i64, message: String },

    /// Network, timeout or server-side availability failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Request not sent because the circuit breaker is open
    #[error("circuit breaker is open, request not sent")]
    CircuitOpen,

    /// Response could not be decoded
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Exchange error code, when the exchange supplied one
    pub fn code(&self) -> Option<i64> {
        match self {
            GatewayError::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Strategy-level failure
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{operation} on {symbol} rejected by exchange (code {code}): {message}")]
    RejectedByExchange {
        symbol: Symbol,
        operation: &'static str,
        code: i64,
        message: String,
    },

    #[error("{operation} on {symbol} failed: {message}")]
    Transport {
        symbol: Symbol,
        operation: &'static str,
        message: String,
    },

    #[error("gateway unavailable for {symbol}: {source}")]
    GatewayUnavailable {
        symbol: Symbol,
        #[source]
        source: GatewayError,
    },

    #[error(
        "{failed_leg} leg on {symbol} failed after order {placed_order_id} was placed \
         (rolled back: {rolled_back}): {source}"
    )]
    PartialPlacementRollback {
        symbol: Symbol,
        failed_leg: &'static str,
        placed_order_id: OrderId,
        rolled_back: bool,
        #[source]
        source: GatewayError,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no open position for {0}")]
    NoOpenPosition(Symbol),

    #[error("no active grid for {0}")]
    UnknownGrid(Symbol),
}

impl StrategyError {
    /// Attach symbol and operation context to a gateway failure
    pub fn gateway(symbol: &Symbol, operation: &'static str, err: GatewayError) -> Self {
        match err {
            GatewayError::Rejected { code, message } => StrategyError::RejectedByExchange {
                symbol: symbol.clone(),
                operation,
                code,
                message,
            },
            other => StrategyError::Transport {
                symbol: symbol.clone(),
                operation,
                message: other.to_string(),
            },
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        StrategyError::Configuration(msg.into())
    }
}

pub type StrategyResult<T> = Result<T, StrategyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_keeps_exchange_code() {
        let symbol = Symbol::new("BTCUSDT");
        let err = StrategyError::gateway(
            &symbol,
            "place take-profit",
            GatewayError::Rejected {
                code: -2019,
                message: "Margin is insufficient.".to_string(),
            },
        );

        let text = err.to_string();
        assert!(text.contains("BTCUSDT"));
        assert!(text.contains("-2019"));
        assert!(text.contains("place take-profit"));
        assert!(matches!(
            err,
            StrategyError::RejectedByExchange { code: -2019, .. }
        ));
    }

    #[test]
    fn test_circuit_open_maps_to_transport() {
        let symbol = Symbol::new("ETHUSDT");
        let err = StrategyError::gateway(&symbol, "list open orders", GatewayError::CircuitOpen);
        assert!(matches!(err, StrategyError::Transport { .. }));
    }

    #[test]
    fn test_gateway_error_code() {
        assert_eq!(
            GatewayError::Rejected {
                code: -1111,
                message: "Precision is over the maximum defined for this asset.".into()
            }
            .code(),
            Some(-1111)
        );
        assert_eq!(GatewayError::Transport("timeout".into()).code(), None);
    }
}
