//! Position model holding the trailing-stop state for one tracked holding.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::StopLossError;
use crate::trading::TrailGauge;

/// How the stop distance is measured from the high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopMode {
    /// Stop sits `parameter` percent below the high.
    Percentage,
    /// Stop sits a fixed currency offset below the high.
    #[serde(alias = "difference")]
    Fixed,
}

impl StopMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopMode::Percentage => "percentage",
            StopMode::Fixed => "fixed",
        }
    }
}

impl fmt::Display for StopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StopMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "percentage" | "percent" | "pct" => Ok(StopMode::Percentage),
            "fixed" | "difference" | "diff" => Ok(StopMode::Fixed),
            other => Err(format!("unknown stop mode '{}'", other)),
        }
    }
}

/// Trailing stop-loss state for a single symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLossPosition {
    /// Instrument identifier, unique within a registry
    pub symbol: String,

    /// Units held
    pub quantity: u64,

    /// Price at which the position was opened
    pub entry_price: Decimal,

    /// How `stop_parameter` is interpreted
    pub stop_mode: StopMode,

    /// Percentage points or absolute offset, depending on `stop_mode`
    pub stop_parameter: Decimal,

    /// Highest price observed since tracking began
    pub high_water_mark: Decimal,

    /// Current exit trigger
    pub stop_price: Decimal,

    /// Exit orders that failed since the stop was breached
    #[serde(default)]
    pub failed_exit_attempts: u32,

    /// When the stop was first breached, if it has been
    #[serde(default)]
    pub triggered_at: Option<DateTime<Utc>>,

    /// When tracking started
    #[serde(default = "Utc::now")]
    pub registered_at: DateTime<Utc>,
}

impl StopLossPosition {
    /// Arm a new trailing stop at `entry_price`.
    pub fn new(
        symbol: impl Into<String>,
        quantity: u64,
        entry_price: Decimal,
        stop_mode: StopMode,
        stop_parameter: Decimal,
    ) -> Result<Self, StopLossError> {
        if quantity == 0 {
            return Err(StopLossError::InvalidQuantity);
        }
        let stop_price = TrailGauge::initial_stop(entry_price, stop_mode, stop_parameter)?;

        Ok(Self {
            symbol: symbol.into(),
            quantity,
            entry_price,
            stop_mode,
            stop_parameter,
            high_water_mark: entry_price,
            stop_price,
            failed_exit_attempts: 0,
            triggered_at: None,
            registered_at: Utc::now(),
        })
    }

    /// Check the invariants a restored position must satisfy: a positive
    /// quantity, a valid entry and parameter, a high at or above entry, and a
    /// stop strictly below the high.
    pub fn validate(&self) -> Result<(), StopLossError> {
        if self.quantity == 0 {
            return Err(StopLossError::InvalidQuantity);
        }
        TrailGauge::initial_stop(self.entry_price, self.stop_mode, self.stop_parameter)?;
        if self.high_water_mark < self.entry_price {
            return Err(StopLossError::InvalidPrice(self.high_water_mark));
        }
        if self.stop_price >= self.high_water_mark {
            return Err(StopLossError::InvalidPrice(self.stop_price));
        }
        Ok(())
    }

    /// True once the stop has been breached but no exit order has gone through.
    pub fn is_exit_pending(&self) -> bool {
        self.triggered_at.is_some()
    }

    /// Gain locked in by the current stop relative to entry, per unit.
    pub fn locked_in(&self) -> Decimal {
        self.stop_price - self.entry_price
    }

    /// Unrealized P&L at a given price.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * Decimal::from(self.quantity)
    }
}
