//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the trailing stop engine loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between ticks
    pub poll_interval_secs: u64,

    /// Upper bound on a single price fetch
    pub price_timeout_ms: u64,

    /// Upper bound on a single exit order submission
    pub order_timeout_ms: u64,

    /// Give up on an exit after this many failed orders (None = keep retrying)
    pub max_exit_attempts: Option<u32>,

    /// Fetch prices for all symbols concurrently within a tick
    pub concurrent_quotes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            price_timeout_ms: 3_000,
            order_timeout_ms: 10_000,
            max_exit_attempts: None,
            concurrent_quotes: true,
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn price_timeout(&self) -> Duration {
        Duration::from_millis(self.price_timeout_ms)
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_millis(self.order_timeout_ms)
    }
}
