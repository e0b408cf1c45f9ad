//! In-process store, for hosts that manage durability themselves and for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ConfigStore, TradeJournal};
use crate::error::StoreError;
use crate::models::{ClosedTrade, RegistrySnapshot};

/// Snapshot and journal held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: RwLock<Option<RegistrySnapshot>>,
    exits: RwLock<Vec<ClosedTrade>>,
    fail_writes: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing snapshot.
    pub fn with_snapshot(snapshot: RegistrySnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Some(snapshot)),
            ..Self::default()
        }
    }

    /// Make subsequent saves fail with `WriteError`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Last saved snapshot, if any.
    pub async fn stored(&self) -> Option<RegistrySnapshot> {
        self.snapshot.read().await.clone()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn load(&self) -> Result<RegistrySnapshot, StoreError> {
        self.snapshot.read().await.clone().ok_or(StoreError::NotFound)
    }

    async fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteError("memory store is read-only".to_string()));
        }
        *self.snapshot.write().await = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TradeJournal for MemoryStore {
    async fn record_exit(&self, trade: &ClosedTrade) -> Result<(), StoreError> {
        self.exits.write().await.push(trade.clone());
        Ok(())
    }

    async fn recent_exits(&self, limit: usize) -> Result<Vec<ClosedTrade>, StoreError> {
        let exits = self.exits.read().await;
        Ok(exits.iter().rev().take(limit).cloned().collect())
    }
}
