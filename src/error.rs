//! Error taxonomy for the trailing stop-loss core.
//!
//! Construction errors (`InvalidParameter`, `InvalidPrice`, `InvalidQuantity`)
//! reject a single registration call. Everything else is recoverable and is
//! logged by the engine, which retries on the next tick.

use rust_decimal::Decimal;
use thiserror::Error;

/// Failure reported by a [`PriceFeed`](crate::api::PriceFeed).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("unknown symbol: {0}")]
    SymbolUnknown(String),

    #[error("price request timed out")]
    Timeout,

    #[error("price feed unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by an [`OrderExecutor`](crate::api::OrderExecutor).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("order submission timed out")]
    Timeout,

    #[error("order endpoint unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by a [`ConfigStore`](crate::store::ConfigStore) or
/// [`TradeJournal`](crate::store::TradeJournal).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no snapshot stored")]
    NotFound,

    #[error("stored snapshot is corrupt: {0}")]
    Corrupt(String),

    #[error("failed to write snapshot: {0}")]
    WriteError(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Errors surfaced by the engine's public operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StopLossError {
    #[error("invalid stop parameter {0}: must be positive (and below 100 for percentage stops)")]
    InvalidParameter(Decimal),

    #[error("invalid price {0}: must be positive")]
    InvalidPrice(Decimal),

    #[error("invalid quantity: must be at least one unit")]
    InvalidQuantity,

    #[error("no price available for {symbol}: {source}")]
    PriceUnavailable {
        symbol: String,
        #[source]
        source: FeedError,
    },

    #[error("operation timed out")]
    Timeout,

    #[error("exit order for {symbol} rejected: {reason}")]
    OrderRejected { symbol: String, reason: String },

    #[error("exit order for {symbol} could not be submitted: {reason}")]
    OrderSubmissionFailed { symbol: String, reason: String },

    #[error("store corrupt: {0}")]
    StoreCorrupt(String),

    #[error("store write failed: {0}")]
    StoreWriteError(String),

    #[error("engine is already running")]
    AlreadyRunning,
}

impl StopLossError {
    /// Classify an order failure for a given symbol.
    pub fn from_order(symbol: &str, err: OrderError) -> Self {
        match err {
            OrderError::Rejected(reason) => StopLossError::OrderRejected {
                symbol: symbol.to_string(),
                reason,
            },
            other => StopLossError::OrderSubmissionFailed {
                symbol: symbol.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<StoreError> for StopLossError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => StopLossError::StoreCorrupt("snapshot missing".to_string()),
            StoreError::Corrupt(msg) => StopLossError::StoreCorrupt(msg),
            StoreError::WriteError(msg) => StopLossError::StoreWriteError(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_error_classification() {
        let rejected = StopLossError::from_order("INFY", OrderError::Rejected("margin".into()));
        assert!(matches!(rejected, StopLossError::OrderRejected { .. }));

        let timeout = StopLossError::from_order("INFY", OrderError::Timeout);
        match timeout {
            StopLossError::OrderSubmissionFailed { symbol, reason } => {
                assert_eq!(symbol, "INFY");
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
