//! In-memory registry of tracked positions, backed by a [`ConfigStore`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::{RegistrySnapshot, StopLossPosition};
use crate::store::ConfigStore;

/// Symbol → position map with snapshot persistence.
///
/// Not synchronized itself; the engine owns it behind a single mutex.
pub struct PositionRegistry {
    positions: HashMap<String, StopLossPosition>,
    credential_token: Option<String>,
    store: Arc<dyn ConfigStore>,
    dirty: bool,
}

impl PositionRegistry {
    /// Empty registry that persists to `store`.
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            positions: HashMap::new(),
            credential_token: None,
            store,
            dirty: false,
        }
    }

    /// Load from `store`, falling back to an empty registry when the snapshot
    /// is missing or unreadable.
    pub async fn load(store: Arc<dyn ConfigStore>) -> Self {
        let mut registry = Self::new(store);

        match registry.store.load().await {
            Ok(snapshot) => {
                registry.credential_token = snapshot.credential_token;
                for position in snapshot.positions {
                    if let Err(e) = position.validate() {
                        let err = StoreError::Corrupt(format!("{}: {}", position.symbol, e));
                        warn!(symbol = %position.symbol, error = %err, "Skipping invalid stored position");
                        continue;
                    }
                    if let Some(previous) = registry.positions.insert(position.symbol.clone(), position) {
                        warn!(symbol = %previous.symbol, "Duplicate symbol in snapshot, keeping the last entry");
                    }
                }
                info!(positions = registry.positions.len(), "Loaded tracked positions");
            }
            Err(StoreError::NotFound) => {
                info!("No stored positions found, starting fresh");
            }
            Err(e) => {
                warn!(error = %e, "Failed to load stored positions, starting with an empty registry");
            }
        }

        registry
    }

    /// Current state in persisted form, ordered by symbol.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut positions: Vec<_> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        RegistrySnapshot {
            credential_token: self.credential_token.clone(),
            positions,
        }
    }

    /// Write the snapshot. On failure the registry stays dirty so the next
    /// flush retries.
    pub async fn save(&mut self) -> Result<(), StoreError> {
        let snapshot = self.snapshot();
        match self.store.save(&snapshot).await {
            Ok(()) => {
                self.dirty = false;
                debug!(positions = snapshot.positions.len(), "Persisted registry");
                Ok(())
            }
            Err(e) => {
                self.dirty = true;
                Err(e)
            }
        }
    }

    async fn persist(&mut self) {
        self.dirty = true;
        if let Err(e) = self.save().await {
            warn!(error = %e, "Failed to persist registry, will retry on next tick");
        }
    }

    /// Track `position`, replacing any existing entry for its symbol.
    /// Returns the replaced position.
    pub async fn register(&mut self, position: StopLossPosition) -> Option<StopLossPosition> {
        info!(
            symbol = %position.symbol,
            quantity = position.quantity,
            entry = %position.entry_price,
            mode = %position.stop_mode,
            parameter = %position.stop_parameter,
            stop = %position.stop_price,
            "Tracking position"
        );

        let replaced = self.positions.insert(position.symbol.clone(), position);
        self.persist().await;
        replaced
    }

    /// Stop tracking `symbol`. Returns whether anything was removed.
    pub async fn unregister(&mut self, symbol: &str) -> bool {
        if self.positions.remove(symbol).is_none() {
            return false;
        }

        info!(symbol = %symbol, "Stopped tracking position");
        self.persist().await;
        true
    }

    pub fn get(&self, symbol: &str) -> Option<StopLossPosition> {
        self.positions.get(symbol).cloned()
    }

    pub(crate) fn get_mut(&mut self, symbol: &str) -> Option<&mut StopLossPosition> {
        self.positions.get_mut(symbol)
    }

    /// Copy of every tracked position, safe to iterate while the registry
    /// keeps changing.
    pub fn all(&self) -> Vec<(String, StopLossPosition)> {
        let mut all: Vec<_> = self
            .positions
            .iter()
            .map(|(symbol, pos)| (symbol.clone(), pos.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Positions whose stop was breached but not yet exited.
    pub fn pending_exits(&self) -> usize {
        self.positions.values().filter(|p| p.is_exit_pending()).count()
    }

    pub fn credential_token(&self) -> Option<&str> {
        self.credential_token.as_deref()
    }

    pub async fn set_credential_token(&mut self, token: Option<String>) {
        self.credential_token = token;
        self.persist().await;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// True when in-memory state has not reached the store yet.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
