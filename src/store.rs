use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::types::TransactionLocation;

/// Durable home of every monitor's cursor.
///
/// Writes overwrite the previous cursor of the same monitor key.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn store(&self, monitor_key: &str, cursor: &TransactionLocation) -> Result<()>;

    async fn load(&self, monitor_key: &str) -> Result<Option<TransactionLocation>>;
}

/// Cursors kept in a single JSON file, rewritten atomically on every store
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    // Serializes read-modify-write cycles so concurrent stores never race on
    // the temp file
    write_lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<HashMap<String, TransactionLocation>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(HashMap::new()),
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("corrupted state file {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", self.path.display())),
        }
    }

    async fn write_all(&self, cursors: &HashMap<String, TransactionLocation>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let contents = serde_json::to_string_pretty(cursors)?;

        // Write to temporary file first, then rename so the state file is
        // never observed half-written
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, contents).await?;

        match tokio::fs::rename(&temp_path, &self.path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn store(&self, monitor_key: &str, cursor: &TransactionLocation) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut cursors = self.read_all().await?;
        cursors.insert(monitor_key.to_string(), cursor.clone());
        self.write_all(&cursors).await?;

        debug!(
            monitor_key = %monitor_key,
            block_hash = %cursor.block_hash,
            tx_id = ?cursor.tx_id,
            "Cursor persisted"
        );
        Ok(())
    }

    async fn load(&self, monitor_key: &str) -> Result<Option<TransactionLocation>> {
        let _guard = self.write_lock.lock().await;
        Ok(self.read_all().await?.remove(monitor_key))
    }
}

/// Cursors kept in memory only; used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    cursors: RwLock<HashMap<String, TransactionLocation>>,
    history: RwLock<Vec<(String, TransactionLocation)>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write in order, including overwritten ones
    pub async fn history(&self) -> Vec<(String, TransactionLocation)> {
        self.history.read().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn store(&self, monitor_key: &str, cursor: &TransactionLocation) -> Result<()> {
        self.cursors
            .write()
            .await
            .insert(monitor_key.to_string(), cursor.clone());
        self.history
            .write()
            .await
            .push((monitor_key.to_string(), cursor.clone()));
        Ok(())
    }

    async fn load(&self, monitor_key: &str) -> Result<Option<TransactionLocation>> {
        Ok(self.cursors.read().await.get(monitor_key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state").join("cursors.json"));

        assert_eq!(store.load("nineChronicles").await.unwrap(), None);

        let first = TransactionLocation::new("0xaaa", Some("tx-1".to_string()));
        store.store("nineChronicles", &first).await.unwrap();
        assert_eq!(store.load("nineChronicles").await.unwrap(), Some(first));

        let second = TransactionLocation::block("0xbbb");
        store.store("nineChronicles", &second).await.unwrap();
        store
            .store("ethereum", &TransactionLocation::block("0xccc"))
            .await
            .unwrap();

        // A fresh instance sees the durable copy
        let reopened = FileStateStore::new(store.path().to_path_buf());
        assert_eq!(reopened.load("nineChronicles").await.unwrap(), Some(second));
        assert_eq!(
            reopened.load("ethereum").await.unwrap(),
            Some(TransactionLocation::block("0xccc"))
        );
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_format_is_camel_case() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursors.json");
        let store = FileStateStore::new(&path);

        store
            .store("nineChronicles", &TransactionLocation::block("0xaaa"))
            .await
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["nineChronicles"]["blockHash"], "0xaaa");
        assert!(raw["nineChronicles"]["txId"].is_null());
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupted_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursors.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileStateStore::new(&path);
        assert!(store.load("nineChronicles").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_keeps_history() {
        let store = MemoryStateStore::new();
        store
            .store("key", &TransactionLocation::block("0x1"))
            .await
            .unwrap();
        store
            .store("key", &TransactionLocation::block("0x2"))
            .await
            .unwrap();

        assert_eq!(
            store.load("key").await.unwrap(),
            Some(TransactionLocation::block("0x2"))
        );
        assert_eq!(store.history().await.len(), 2);
    }
}
