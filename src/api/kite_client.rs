//! Kite Connect REST client used as the live price feed and order executor.
//!
//! Handles:
//! - Last-traded-price quotes (`GET /quote/ltp`), retried with exponential
//!   backoff inside a bounded budget
//! - Market sell orders (`POST /orders/regular`), never retried
//!
//! The access token is obtained by the host; this client only uses it.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use tracing::debug;

use super::traits::{OrderAccepted, OrderExecutor, PriceFeed};
use super::types::{KiteEnvelope, LtpData, OrderData};
use crate::error::{FeedError, OrderError};

/// Kite Connect API base URL
pub const KITE_API_URL: &str = "https://api.kite.trade";

const KITE_VERSION: &str = "3";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_BUDGET: Duration = Duration::from_secs(2);

/// Connection settings for [`KiteClient`].
#[derive(Debug, Clone)]
pub struct KiteConfig {
    pub base_url: String,
    pub api_key: String,
    pub access_token: String,

    /// Exchange used when a symbol has no `EXCHANGE:` prefix
    pub default_exchange: String,

    /// Product code for exit orders (CNC for delivery, MIS for intraday)
    pub product: String,

    /// Per-request HTTP timeout
    pub request_timeout: Duration,

    /// Total time spent retrying a quote before giving up
    pub retry_budget: Duration,
}

impl KiteConfig {
    pub fn new(api_key: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: KITE_API_URL.to_string(),
            api_key: api_key.into(),
            access_token: access_token.into(),
            default_exchange: "NSE".to_string(),
            product: "CNC".to_string(),
            request_timeout: DEFAULT_TIMEOUT,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }
}

/// HTTP client for the Kite Connect API.
pub struct KiteClient {
    http: Client,
    config: KiteConfig,
}

impl KiteClient {
    pub fn new(config: KiteConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { http, config })
    }

    /// Build from `KITE_API_KEY`, `KITE_ACCESS_TOKEN`, and optional
    /// `KITE_BASE_URL` / `KITE_EXCHANGE` / `KITE_PRODUCT`.
    ///
    /// `fallback_token` is used when `KITE_ACCESS_TOKEN` is unset.
    pub fn from_env(fallback_token: Option<&str>) -> Result<Self> {
        let api_key = std::env::var("KITE_API_KEY").context("KITE_API_KEY not set")?;
        let access_token = match std::env::var("KITE_ACCESS_TOKEN") {
            Ok(token) => token,
            Err(_) => fallback_token
                .map(str::to_string)
                .context("KITE_ACCESS_TOKEN not set and no stored credential token")?,
        };

        let mut config = KiteConfig::new(api_key, access_token);
        if let Ok(url) = std::env::var("KITE_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(exchange) = std::env::var("KITE_EXCHANGE") {
            config.default_exchange = exchange;
        }
        if let Ok(product) = std::env::var("KITE_PRODUCT") {
            config.product = product;
        }

        Self::new(config)
    }

    /// Split `EXCHANGE:SYMBOL`, falling back to the default exchange.
    fn split_symbol<'a>(&'a self, symbol: &'a str) -> (&'a str, &'a str) {
        match symbol.split_once(':') {
            Some((exchange, tradingsymbol)) => (exchange, tradingsymbol),
            None => (self.config.default_exchange.as_str(), symbol),
        }
    }

    fn instrument_key(&self, symbol: &str) -> String {
        let (exchange, tradingsymbol) = self.split_symbol(symbol);
        format!("{}:{}", exchange, tradingsymbol)
    }

    fn auth_header(&self) -> String {
        format!("token {}:{}", self.config.api_key, self.config.access_token)
    }

    /// One quote request, classified for the retry policy.
    async fn fetch_ltp(&self, symbol: &str, key: &str) -> Result<Decimal, backoff::Error<FeedError>> {
        let url = format!("{}/quote/ltp", self.config.base_url);
        debug!(url = %url, instrument = %key, "Fetching last price");

        let resp = self
            .http
            .get(&url)
            .query(&[("i", key)])
            .header("X-Kite-Version", KITE_VERSION)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| backoff::Error::transient(feed_error(e)))?;

        let status = resp.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            let text = resp.text().await.unwrap_or_default();
            return Err(backoff::Error::transient(FeedError::Unavailable(format!(
                "{} - {}",
                status, text
            ))));
        }

        let envelope: KiteEnvelope<LtpData> = resp
            .json()
            .await
            .map_err(|e| backoff::Error::permanent(FeedError::Unavailable(e.to_string())))?;

        if !envelope.is_success() {
            let err = match envelope.error_type.as_deref() {
                Some("InputException") => FeedError::SymbolUnknown(symbol.to_string()),
                _ => FeedError::Unavailable(envelope.reason()),
            };
            return Err(backoff::Error::permanent(err));
        }

        let quote = envelope
            .data
            .and_then(|mut data| data.remove(key))
            .ok_or_else(|| backoff::Error::permanent(FeedError::SymbolUnknown(symbol.to_string())))?;

        let price = quote.last_price;
        if price <= Decimal::ZERO {
            return Err(backoff::Error::permanent(FeedError::Unavailable(format!(
                "non-positive price {}",
                price
            ))));
        }

        Ok(price)
    }
}

fn feed_error(e: reqwest::Error) -> FeedError {
    if e.is_timeout() {
        FeedError::Timeout
    } else {
        FeedError::Unavailable(e.to_string())
    }
}

fn order_error(e: reqwest::Error) -> OrderError {
    if e.is_timeout() {
        OrderError::Timeout
    } else {
        OrderError::Unavailable(e.to_string())
    }
}

#[async_trait]
impl PriceFeed for KiteClient {
    async fn last_price(&self, symbol: &str) -> Result<Decimal, FeedError> {
        let key = self.instrument_key(symbol);
        let key = key.as_str();
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_interval(Duration::from_secs(1))
            .with_max_elapsed_time(Some(self.config.retry_budget))
            .build();

        backoff::future::retry(policy, || self.fetch_ltp(symbol, key)).await
    }
}

#[async_trait]
impl OrderExecutor for KiteClient {
    async fn submit_market_sell(&self, symbol: &str, quantity: u64) -> Result<OrderAccepted, OrderError> {
        let (exchange, tradingsymbol) = self.split_symbol(symbol);
        let url = format!("{}/orders/regular", self.config.base_url);
        let quantity = quantity.to_string();

        let form = [
            ("exchange", exchange),
            ("tradingsymbol", tradingsymbol),
            ("transaction_type", "SELL"),
            ("order_type", "MARKET"),
            ("quantity", quantity.as_str()),
            ("product", self.config.product.as_str()),
            ("validity", "DAY"),
        ];

        debug!(url = %url, symbol = %symbol, quantity = %quantity, "Placing market sell");

        let resp = self
            .http
            .post(&url)
            .header("X-Kite-Version", KITE_VERSION)
            .header("Authorization", self.auth_header())
            .form(&form)
            .send()
            .await
            .map_err(order_error)?;

        let status = resp.status();
        if status.is_server_error() {
            let text = resp.text().await.unwrap_or_default();
            return Err(OrderError::Unavailable(format!("{} - {}", status, text)));
        }

        let envelope: KiteEnvelope<OrderData> = resp
            .json()
            .await
            .map_err(|e| OrderError::Unavailable(format!("unreadable order response: {}", e)))?;

        if !envelope.is_success() {
            return Err(if envelope.is_auth_error() {
                OrderError::Unavailable(envelope.reason())
            } else {
                OrderError::Rejected(envelope.reason())
            });
        }

        let data = envelope
            .data
            .ok_or_else(|| OrderError::Unavailable("order response without data".to_string()))?;

        Ok(OrderAccepted {
            order_id: data.order_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> KiteClient {
        let mut config = KiteConfig::new("key", "secret-token");
        config.base_url = server.uri();
        config.retry_budget = Duration::from_millis(300);
        KiteClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_last_price() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote/ltp"))
            .and(query_param("i", "NSE:INFY"))
            .and(header("X-Kite-Version", "3"))
            .and(header("Authorization", "token key:secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {"NSE:INFY": {"instrument_token": 408065, "last_price": 1074.35}}
            })))
            .mount(&server)
            .await;

        let price = client(&server).last_price("INFY").await.unwrap();
        assert_eq!(price, dec!(1074.35));
    }

    #[tokio::test]
    async fn test_missing_instrument_is_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote/ltp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).last_price("BSE:NOPE").await.unwrap_err();
        assert_eq!(err, FeedError::SymbolUnknown("BSE:NOPE".to_string()));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote/ltp"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client(&server).last_price("INFY").await.unwrap_err();
        assert!(matches!(err, FeedError::Unavailable(_)));

        let requests = server.received_requests().await.unwrap();
        assert!(requests.len() > 1);
    }

    #[tokio::test]
    async fn test_market_sell_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/regular"))
            .and(body_string_contains("transaction_type=SELL"))
            .and(body_string_contains("order_type=MARKET"))
            .and(body_string_contains("tradingsymbol=INFY"))
            .and(body_string_contains("quantity=10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {"order_id": "151220000000000"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let accepted = client(&server).submit_market_sell("NSE:INFY", 10).await.unwrap();
        assert_eq!(accepted.order_id, "151220000000000");
    }

    #[tokio::test]
    async fn test_market_sell_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/regular"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "status": "error",
                "message": "Insufficient holdings",
                "error_type": "OrderException"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).submit_market_sell("INFY", 10).await.unwrap_err();
        assert_eq!(err, OrderError::Rejected("OrderException: Insufficient holdings".to_string()));
    }

    #[tokio::test]
    async fn test_expired_token_is_not_a_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/regular"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "status": "error",
                "message": "Incorrect `api_key` or `access_token`.",
                "error_type": "TokenException"
            })))
            .mount(&server)
            .await;

        let err = client(&server).submit_market_sell("INFY", 1).await.unwrap_err();
        assert!(matches!(err, OrderError::Unavailable(_)));
    }
}
