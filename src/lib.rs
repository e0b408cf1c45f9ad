//! Autotrail: trailing stop-loss engine.
//!
//! Tracks held positions, raises each stop as the price makes new highs, and
//! submits a market sell through the broker once the price falls back to the
//! stop. State survives restarts through a [`store::ConfigStore`].

pub mod api;
pub mod error;
pub mod models;
pub mod store;
pub mod trading;
