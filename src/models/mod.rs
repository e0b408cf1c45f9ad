//! Data models for tracked positions, persisted snapshots, and trade history.

mod position;
mod snapshot;
mod trade;

pub use position::{StopLossPosition, StopMode};
pub use snapshot::RegistrySnapshot;
pub use trade::{ClosedTrade, ExitOutcome};
