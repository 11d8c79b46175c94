//! Binance USDT-M futures REST client
//!
//! A [`Gateway`] implementation with:
//! - HMAC-SHA256 signed requests
//! - Retry with exponential backoff for idempotent calls (never for order
//!   placement or single-order cancels)
//! - Token-bucket throttling
//! - Circuit breaker on consecutive transport failures
//!
//! # Example
//!
//! ```no_run
//! use futures_strategies::gateway::{BinanceClient, ClientConfig, Credentials, Gateway};
//! use futures_strategies::Symbol;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = BinanceClient::new(
//!         Credentials::new("api_key", "api_secret"),
//!         ClientConfig::testnet(),
//!     )?;
//!
//!     let price = client.current_price(&Symbol::new("BTCUSDT")).await?;
//!     println!("BTCUSDT: {}", price);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

use super::auth::Credentials;
use super::circuit_breaker::CircuitBreaker;
use super::throttle::Throttle;
use super::wire::{format_decimal, ApiErrorBody, OrderResponse, PositionRisk, TickerPrice};
use super::Gateway;
use crate::config::{ExchangeConfig, LIVE_BASE_URL, TESTNET_BASE_URL};
use crate::error::{GatewayError, GatewayResult};
use crate::types::{Order, OrderId, OrderRequest, Position, Symbol};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub recv_window_ms: u64,
    /// Retries after the first attempt, idempotent calls only
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry
    pub retry_base_delay: Duration,
    pub timeout: Duration,
    pub rate_limit: usize,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: LIVE_BASE_URL.to_string(),
            recv_window_ms: 5000,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            rate_limit: 10,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    pub fn testnet() -> Self {
        Self::default().with_base_url(TESTNET_BASE_URL)
    }

    /// Build from the `exchange` section of the configuration file
    pub fn from_exchange(exchange: &ExchangeConfig) -> Self {
        Self {
            base_url: exchange.base_url().to_string(),
            recv_window_ms: exchange.recv_window_ms,
            max_retries: exchange.max_retries,
            timeout: exchange.timeout(),
            rate_limit: exchange.rate_limit,
            circuit_breaker_threshold: exchange.circuit_breaker_threshold,
            circuit_breaker_cooldown: exchange.circuit_breaker_cooldown(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: usize) -> Self {
        self.rate_limit = requests_per_second;
        self
    }

    pub fn with_circuit_breaker(mut self, threshold: u32, cooldown: Duration) -> Self {
        self.circuit_breaker_threshold = threshold;
        self.circuit_breaker_cooldown = cooldown;
        self
    }
}

/// Binance USDT-M futures client
pub struct BinanceClient {
    credentials: Credentials,
    http_client: Client,
    base_url: String,
    recv_window_ms: u64,
    max_retries: u32,
    retry_base_delay: Duration,
    throttle: Throttle,
    circuit_breaker: Mutex<CircuitBreaker>,
}

impl BinanceClient {
    pub fn new(credentials: Credentials, config: ClientConfig) -> GatewayResult<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            credentials,
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            recv_window_ms: config.recv_window_ms,
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
            throttle: Throttle::new(config.rate_limit),
            circuit_breaker: Mutex::new(CircuitBreaker::new(
                config.circuit_breaker_threshold,
                config.circuit_breaker_cooldown,
            )),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check connectivity with the unauthenticated ping endpoint
    pub async fn ping(&self) -> GatewayResult<()> {
        let _: IgnoredAny = self
            .execute("ping", true, || self.public_get("/fapi/v1/ping", &[]))
            .await?;
        Ok(())
    }

    /// Run a request through the circuit breaker and throttle, retrying
    /// transport failures when `idempotent` is set
    async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        idempotent: bool,
        request: F,
    ) -> GatewayResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        {
            let mut cb = self.circuit_breaker.lock().await;
            if !cb.can_attempt() {
                return Err(GatewayError::CircuitOpen);
            }
        }

        let max_retries = if idempotent { self.max_retries } else { 0 };
        let mut attempt = 0u32;

        loop {
            self.throttle.acquire().await;

            match request().await {
                Ok(value) => {
                    self.circuit_breaker.lock().await.record_success();
                    return Ok(value);
                }
                Err(GatewayError::Transport(msg)) if attempt < max_retries => {
                    attempt += 1;
                    let delay = self.retry_base_delay * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Request failed, retrying: {}",
                        msg
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    let mut cb = self.circuit_breaker.lock().await;
                    match err {
                        GatewayError::Transport(_) => cb.record_failure(),
                        // the exchange answered, so the connection is healthy
                        GatewayError::Rejected { .. } => cb.record_success(),
                        _ => {}
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> GatewayResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http_client.get(&url).query(params).send().await?;
        read_response(response).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> GatewayResult<T> {
        let query = self.signed_query(params);
        let url = format!("{}{}?{}", self.base_url, path, query);

        let response = self
            .http_client
            .request(method, &url)
            .header("X-MBX-APIKEY", self.credentials.api_key())
            .send()
            .await?;
        read_response(response).await
    }

    fn signed_query(&self, params: &[(&str, String)]) -> String {
        let mut query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>();
        query.push(format!("recvWindow={}", self.recv_window_ms));
        query.push(format!("timestamp={}", chrono::Utc::now().timestamp_millis()));

        let query = query.join("&");
        let signature = self.credentials.sign(&query);
        format!("{}&signature={}", query, signature)
    }
}

/// Map an HTTP response to a payload or a [`GatewayError`]
async fn read_response<T: DeserializeOwned>(response: reqwest::Response) -> GatewayResult<T> {
    let status = response.status();
    let text = response.text().await?;

    if status.is_success() {
        return serde_json::from_str(&text)
            .map_err(|e| GatewayError::Decode(format!("{}: {}", e, truncate(&text))));
    }

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(GatewayError::Transport(format!(
            "HTTP {}: {}",
            status,
            truncate(&text)
        )));
    }

    match serde_json::from_str::<ApiErrorBody>(&text) {
        Ok(body) => Err(GatewayError::Rejected {
            code: body.code,
            message: body.msg,
        }),
        Err(_) => Err(GatewayError::Rejected {
            code: -(status.as_u16() as i64),
            message: truncate(&text).to_string(),
        }),
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn order_params(request: &OrderRequest) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("symbol", request.symbol.to_string()),
        ("side", request.side.as_str().to_string()),
        ("type", request.order_type.as_str().to_string()),
        ("quantity", format_decimal(request.quantity)),
    ];

    if let Some(price) = request.price {
        params.push(("price", format_decimal(price)));
    }
    if let Some(stop_price) = request.stop_price {
        params.push(("stopPrice", format_decimal(stop_price)));
    }
    if let Some(tif) = request.time_in_force {
        params.push(("timeInForce", tif.as_str().to_string()));
    }
    if request.reduce_only {
        params.push(("reduceOnly", "true".to_string()));
    }
    if let Some(position_side) = request.position_side {
        params.push(("positionSide", position_side.as_str().to_string()));
    }
    if let Some(rate) = request.callback_rate {
        params.push(("callbackRate", format_decimal(rate)));
    }
    if let Some(activation) = request.activation_price {
        params.push(("activationPrice", format_decimal(activation)));
    }
    if let Some(working_type) = request.working_type {
        params.push(("workingType", working_type.as_str().to_string()));
    }
    params.push(("newOrderRespType", "RESULT".to_string()));
    params
}

#[async_trait]
impl Gateway for BinanceClient {
    async fn place_order(&self, request: &OrderRequest) -> GatewayResult<Order> {
        let params = order_params(request);
        let response: OrderResponse = self
            .execute("place order", false, || {
                self.signed(Method::POST, "/fapi/v1/order", &params)
            })
            .await?;

        let order = Order::from(response);
        tracing::debug!(
            symbol = %order.symbol,
            order_id = order.id,
            status = ?order.status,
            "Order accepted"
        );
        Ok(order)
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: OrderId) -> GatewayResult<()> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
        ];
        // A retried DELETE can land after the first one succeeded and come
        // back as unknown order, so cancels get a single attempt
        let _: IgnoredAny = self
            .execute("cancel order", false, || {
                self.signed(Method::DELETE, "/fapi/v1/order", &params)
            })
            .await?;
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &Symbol) -> GatewayResult<()> {
        let params = [("symbol", symbol.to_string())];
        let _: IgnoredAny = self
            .execute("cancel all orders", true, || {
                self.signed(Method::DELETE, "/fapi/v1/allOpenOrders", &params)
            })
            .await?;
        Ok(())
    }

    async fn open_orders(&self, symbol: &Symbol) -> GatewayResult<Vec<Order>> {
        let params = [("symbol", symbol.to_string())];
        let orders: Vec<OrderResponse> = self
            .execute("open orders", true, || {
                self.signed(Method::GET, "/fapi/v1/openOrders", &params)
            })
            .await?;
        Ok(orders.into_iter().map(Order::from).collect())
    }

    async fn current_price(&self, symbol: &Symbol) -> GatewayResult<f64> {
        let params = [("symbol", symbol.to_string())];
        let ticker: TickerPrice = self
            .execute("ticker price", true, || {
                self.public_get("/fapi/v1/ticker/price", &params)
            })
            .await?;

        if ticker.price <= 0.0 {
            return Err(GatewayError::Decode(format!(
                "non-positive price {} for {}",
                ticker.price, ticker.symbol
            )));
        }
        Ok(ticker.price)
    }

    async fn open_positions(&self) -> GatewayResult<Vec<Position>> {
        let risks: Vec<PositionRisk> = self
            .execute("position risk", true, || {
                self.signed(Method::GET, "/fapi/v2/positionRisk", &[])
            })
            .await?;

        Ok(risks
            .into_iter()
            .filter(|r| r.position_amt != 0.0)
            .map(Position::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    #[test]
    fn test_order_params_stop_market() {
        let symbol = Symbol::new("BTCUSDT");
        let request = OrderRequest::stop_market(&symbol, Side::Sell, 0.01, 93000.0).reduce_only();
        let params = order_params(&request);

        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("type"), Some("STOP_MARKET"));
        assert_eq!(get("stopPrice"), Some("93000"));
        assert_eq!(get("quantity"), Some("0.01"));
        assert_eq!(get("reduceOnly"), Some("true"));
        assert_eq!(get("workingType"), Some("CONTRACT_PRICE"));
        assert_eq!(get("price"), None);
        assert_eq!(get("timeInForce"), None);
    }

    #[test]
    fn test_signed_query_shape() {
        let client = BinanceClient::new(
            Credentials::new("key", "secret"),
            ClientConfig::default(),
        )
        .unwrap();
        let query = client.signed_query(&[("symbol", "ETHUSDT".to_string())]);

        assert!(query.starts_with("symbol=ETHUSDT&recvWindow=5000&timestamp="));
        let (payload, signature) = query.rsplit_once("&signature=").unwrap();
        assert_eq!(signature, crate::gateway::sign_query(payload, "secret"));
    }

    #[test]
    fn test_truncate() {
        let long = "x".repeat(500);
        assert_eq!(truncate(&long).len(), 200);
        assert_eq!(truncate("short"), "short");
    }
}
