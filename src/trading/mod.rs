//! Trailing stop logic: gauge arithmetic, position registry, polling engine.

mod config;
mod engine;
mod gauge;
mod registry;

pub use config::EngineConfig;
pub use engine::{EngineStats, TickReport, TrailingStopEngine};
pub use gauge::{TrailGauge, TriggerDecision};
pub use registry::PositionRegistry;
