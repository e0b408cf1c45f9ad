//! Snapshot persistence in a single JSON file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::ConfigStore;
use crate::error::StoreError;
use crate::models::RegistrySnapshot;

/// Stores the registry snapshot as pretty-printed JSON.
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    async fn load(&self) -> Result<RegistrySnapshot, StoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) => return Err(StoreError::Corrupt(format!("{}: {}", self.path.display(), e))),
        };

        let snapshot = RegistrySnapshot::from_json(&content)?;
        debug!(path = %self.path.display(), positions = snapshot.positions.len(), "Loaded snapshot");
        Ok(snapshot)
    }

    async fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), StoreError> {
        let content = snapshot
            .to_json()
            .map_err(|e| StoreError::WriteError(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::WriteError(e.to_string()))?;
        }

        let tmp = self.temp_path();
        fs::write(&tmp, content)
            .await
            .map_err(|e| StoreError::WriteError(format!("{}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::WriteError(format!("{}: {}", self.path.display(), e)))?;

        debug!(path = %self.path.display(), positions = snapshot.positions.len(), "Saved snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StopLossPosition, StopMode};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("positions.json"));

        assert_eq!(store.load().await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load().await, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("positions.json"));

        let mut infy = StopLossPosition::new("NSE:INFY", 12, dec!(1500.5), StopMode::Percentage, dec!(2.5)).unwrap();
        infy.high_water_mark = dec!(1580.25);
        infy.stop_price = dec!(1540.74375);
        let tcs = StopLossPosition::new("TCS", 3, dec!(3900), StopMode::Fixed, dec!(45)).unwrap();

        let snapshot = RegistrySnapshot {
            credential_token: Some("access-123".to_string()),
            positions: vec![infy, tcs],
        };

        store.save(&snapshot).await.unwrap();
        assert_eq!(store.load().await.unwrap(), snapshot);
        assert!(!store.temp_path().exists());
    }
}
