//! Paper broker: simulated prices and fills for dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::traits::{OrderAccepted, OrderExecutor, PriceFeed};
use crate::error::{FeedError, OrderError};

/// Order recorded by the paper broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperOrder {
    pub order_id: String,
    pub symbol: String,
    pub quantity: u64,
    pub submitted_at: DateTime<Utc>,
}

/// Simulated broker with settable prices.
///
/// Orders are accepted immediately unless rejection is switched on, in which
/// case every submission fails with `Rejected`.
#[derive(Debug, Default)]
pub struct PaperBroker {
    prices: RwLock<HashMap<String, Decimal>>,
    orders: RwLock<Vec<PaperOrder>>,
    reject_orders: AtomicBool,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    pub fn set_reject_orders(&self, reject: bool) {
        self.reject_orders.store(reject, Ordering::SeqCst);
    }

    /// All orders accepted so far, oldest first.
    pub async fn orders(&self) -> Vec<PaperOrder> {
        self.orders.read().await.clone()
    }
}

#[async_trait]
impl PriceFeed for PaperBroker {
    async fn last_price(&self, symbol: &str) -> Result<Decimal, FeedError> {
        self.prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| FeedError::SymbolUnknown(symbol.to_string()))
    }
}

#[async_trait]
impl OrderExecutor for PaperBroker {
    async fn submit_market_sell(&self, symbol: &str, quantity: u64) -> Result<OrderAccepted, OrderError> {
        if self.reject_orders.load(Ordering::SeqCst) {
            return Err(OrderError::Rejected("paper broker is rejecting orders".to_string()));
        }

        let order = PaperOrder {
            order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            quantity,
            submitted_at: Utc::now(),
        };

        info!(
            order_id = %order.order_id,
            symbol = %symbol,
            quantity = quantity,
            "[PAPER] Market sell filled"
        );

        let accepted = OrderAccepted {
            order_id: order.order_id.clone(),
        };
        self.orders.write().await.push(order);
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_prices_and_orders() {
        let broker = PaperBroker::new();
        assert_eq!(
            broker.last_price("SYM").await,
            Err(FeedError::SymbolUnknown("SYM".to_string()))
        );

        broker.set_price("SYM", dec!(101.5)).await;
        assert_eq!(broker.last_price("SYM").await.unwrap(), dec!(101.5));

        let accepted = broker.submit_market_sell("SYM", 4).await.unwrap();
        let orders = broker.orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_id, accepted.order_id);
        assert_eq!(orders[0].quantity, 4);
    }

    #[tokio::test]
    async fn test_rejection_toggle() {
        let broker = PaperBroker::new();
        broker.set_reject_orders(true);
        assert!(matches!(
            broker.submit_market_sell("SYM", 1).await,
            Err(OrderError::Rejected(_))
        ));
        assert!(broker.orders().await.is_empty());

        broker.set_reject_orders(false);
        assert!(broker.submit_market_sell("SYM", 1).await.is_ok());
    }
}
