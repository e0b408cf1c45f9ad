//! Closed trade record written when a tracked position is retired.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StopLossPosition;

/// How a tracked position left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitOutcome {
    /// The exit order was accepted by the broker.
    Executed,
    /// Exit attempts were exhausted and tracking gave up.
    Abandoned,
}

impl ExitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitOutcome::Executed => "executed",
            ExitOutcome::Abandoned => "abandoned",
        }
    }
}

impl std::str::FromStr for ExitOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executed" => Ok(ExitOutcome::Executed),
            "abandoned" => Ok(ExitOutcome::Abandoned),
            other => Err(format!("unknown exit outcome '{}'", other)),
        }
    }
}

/// Trade history entry for a retired position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub id: String,
    pub symbol: String,
    pub quantity: u64,
    pub entry_price: Decimal,
    pub high_water_mark: Decimal,

    /// Stop level that was breached
    pub stop_price: Decimal,

    /// Price that breached it
    pub observed_price: Decimal,

    /// Broker order id, when the exit went through
    pub order_id: Option<String>,

    pub outcome: ExitOutcome,
    pub closed_at: DateTime<Utc>,
}

impl ClosedTrade {
    /// Build a history record from the position as it stood at exit time.
    pub fn from_position(
        position: &StopLossPosition,
        observed_price: Decimal,
        order_id: Option<String>,
        outcome: ExitOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: position.symbol.clone(),
            quantity: position.quantity,
            entry_price: position.entry_price,
            high_water_mark: position.high_water_mark,
            stop_price: position.stop_price,
            observed_price,
            order_id,
            outcome,
            closed_at: Utc::now(),
        }
    }

    /// P&L versus entry, assuming a fill at the trigger level.
    pub fn realized_at_stop(&self) -> Decimal {
        (self.stop_price - self.entry_price) * Decimal::from(self.quantity)
    }
}
