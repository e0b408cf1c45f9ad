//! Response types for the Kite Connect REST API.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;

/// Every Kite response is wrapped in this envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct KiteEnvelope<T> {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
    pub data: Option<T>,
}

impl<T> KiteEnvelope<T> {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// Human-readable failure reason.
    pub fn reason(&self) -> String {
        match (&self.error_type, &self.message) {
            (Some(kind), Some(msg)) => format!("{}: {}", kind, msg),
            (None, Some(msg)) => msg.clone(),
            (Some(kind), None) => kind.clone(),
            (None, None) => format!("status {}", self.status),
        }
    }

    /// Errors caused by credentials rather than the request itself.
    pub fn is_auth_error(&self) -> bool {
        matches!(self.error_type.as_deref(), Some("TokenException") | Some("PermissionException"))
    }
}

/// Entry in the `/quote/ltp` response, keyed by `EXCHANGE:SYMBOL`.
#[derive(Debug, Clone, Deserialize)]
pub struct LtpQuote {
    #[serde(default)]
    pub instrument_token: u64,
    /// Sent as a JSON number; parsed from its literal digits.
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub last_price: Decimal,
}

pub type LtpData = HashMap<String, LtpQuote>;

/// Payload of a successful order placement.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderData {
    pub order_id: String,
}
