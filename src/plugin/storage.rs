//! Plugin Storage
//!
//! Global cross-plugin key/value storage and per-plugin private directories.

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;
use serde_json::Value;
use crate::plugin::error::{PluginError, PluginResult};

/// Key/value storage shared by every plugin
#[async_trait]
pub trait GlobalStorage: Send + Sync {
    async fn get(&self, key: &str) -> PluginResult<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> PluginResult<()>;

    /// Remove a key, returning whether it existed
    async fn delete(&self, key: &str) -> PluginResult<bool>;

    /// All keys in ascending order
    async fn keys(&self) -> PluginResult<Vec<String>>;
}

/// In-process global storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, Value>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl GlobalStorage for MemoryStorage {
    async fn get(&self, key: &str) -> PluginResult<Option<Value>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: Value) -> PluginResult<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> PluginResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn keys(&self) -> PluginResult<Vec<String>> {
        let mut keys: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }
}

/// Private storage directory for a plugin under `root`
pub fn plugin_storage_path(root: &Path, plugin_id: &str) -> PathBuf {
    root.join(plugin_id)
}

/// Ensure the plugin's private storage directory exists
///
/// Idempotent: an existing directory is left as is.
pub async fn prepare_plugin_storage(root: &Path, plugin_id: &str) -> PluginResult<PathBuf> {
    let path = plugin_storage_path(root, plugin_id);
    tokio::fs::create_dir_all(&path).await.map_err(|e| {
        PluginError::storage(
            plugin_id,
            format!("Failed to create storage directory {}: {}", path.display(), e),
        )
    })?;
    debug!("Storage for plugin '{}' at {}", plugin_id, path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("theme").await.unwrap(), None);

        storage.set("theme", json!("dark")).await.unwrap();
        storage.set("limits", json!({"max": 3})).await.unwrap();
        assert_eq!(storage.get("theme").await.unwrap(), Some(json!("dark")));
        assert_eq!(storage.keys().await.unwrap(), vec!["limits", "theme"]);

        assert!(storage.delete("theme").await.unwrap());
        assert!(!storage.delete("theme").await.unwrap());
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_prepare_plugin_storage_is_idempotent() {
        let root = TempDir::new().unwrap();
        let first = prepare_plugin_storage(root.path(), "docker").await.unwrap();
        std::fs::write(first.join("state.json"), "{}").unwrap();

        let second = prepare_plugin_storage(root.path(), "docker").await.unwrap();
        assert_eq!(first, second);
        assert!(second.join("state.json").exists());
    }

    #[tokio::test]
    async fn test_prepare_plugin_storage_failure() {
        let root = TempDir::new().unwrap();
        let blocker = root.path().join("blocked");
        std::fs::write(&blocker, "not a directory").unwrap();

        let err = prepare_plugin_storage(&blocker, "docker").await.unwrap_err();
        assert!(matches!(err, PluginError::Storage { ref plugin_id, .. } if plugin_id == "docker"));
    }
}
