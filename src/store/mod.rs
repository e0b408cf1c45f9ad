//! Durable storage for registry snapshots and trade history.

mod json_file;
mod memory;
mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{ClosedTrade, RegistrySnapshot};

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Key-value persistence for the engine's registry snapshot.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Load the last saved snapshot.
    async fn load(&self) -> Result<RegistrySnapshot, StoreError>;

    /// Replace the stored snapshot.
    async fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), StoreError>;
}

/// Append-only record of retired positions.
#[async_trait]
pub trait TradeJournal: Send + Sync {
    async fn record_exit(&self, trade: &ClosedTrade) -> Result<(), StoreError>;

    /// Most recent exits first.
    async fn recent_exits(&self, limit: usize) -> Result<Vec<ClosedTrade>, StoreError>;
}
