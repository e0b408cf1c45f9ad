//! Broker interfaces and their implementations.

mod kite_client;
mod paper;
mod traits;
mod types;

pub use kite_client::{KiteClient, KiteConfig, KITE_API_URL};
pub use paper::{PaperBroker, PaperOrder};
pub use traits::{OrderAccepted, OrderExecutor, PriceFeed};
pub use types::{KiteEnvelope, LtpData, LtpQuote, OrderData};
