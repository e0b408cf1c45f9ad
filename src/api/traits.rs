//! Broker-facing interfaces the engine consumes.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{FeedError, OrderError};

/// Acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAccepted {
    pub order_id: String,
}

/// Source of last-traded prices.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn last_price(&self, symbol: &str) -> Result<Decimal, FeedError>;
}

/// Places exit orders with the broker.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    /// Sell `quantity` units of `symbol` at market.
    async fn submit_market_sell(&self, symbol: &str, quantity: u64) -> Result<OrderAccepted, OrderError>;
}
