//! Request signing for Binance signed endpoints
//!
//! The signature is an HMAC-SHA256 over the exact query string that is sent,
//! hex encoded and appended as the `signature` parameter.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Sign a URL-encoded query string with the API secret
///
/// # Example
///
/// ```
/// use futures_strategies::gateway::sign_query;
///
/// let signature = sign_query("symbol=BTCUSDT&timestamp=1700000000000", "secret");
/// assert_eq!(signature.len(), 64);
/// ```
pub fn sign_query(query: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// API key pair
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Sign a query string
    pub fn sign(&self, query: &str) -> String {
        sign_query(query, &self.api_secret)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .finish()
    }
}
