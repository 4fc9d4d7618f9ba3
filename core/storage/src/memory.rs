//! In-memory storage: the tab cache tier and a key-value store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use prefsync_common::{PreferenceDocument, Result, TierId};

use crate::tier::{KeyValueStore, StorageTier};

/// T1: tab-scoped document cache.
///
/// Lives as long as the owning tab; nothing survives a drop.
pub struct TabCache {
    document: RwLock<Option<PreferenceDocument>>,
}

impl TabCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            document: RwLock::new(None),
        }
    }

    /// Check if a document is cached.
    pub async fn is_empty(&self) -> bool {
        self.document.read().await.is_none()
    }
}

impl Default for TabCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageTier for TabCache {
    fn tier(&self) -> TierId {
        TierId::TabCache
    }

    async fn read(&self) -> Result<Option<PreferenceDocument>> {
        Ok(self.document.read().await.clone())
    }

    async fn write(&self, doc: &PreferenceDocument) -> Result<PreferenceDocument> {
        *self.document.write().await = Some(doc.clone());
        Ok(doc.clone())
    }

    async fn clear(&self) -> Result<()> {
        *self.document.write().await = None;
        Ok(())
    }
}

/// In-memory key-value store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop.
pub struct MemoryKv {
    data: RwLock<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Get current key count
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        self.data
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_raw(&self, key: &str) -> Result<()> {
        self.data.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prefsync_common::ThemeMode;

    #[tokio::test]
    async fn test_tab_cache_starts_empty() {
        let cache = TabCache::new();
        assert!(cache.is_empty().await);
        assert!(cache.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tab_cache_write_read_clear() {
        let cache = TabCache::new();
        let mut doc = PreferenceDocument::new_default();
        doc.mode = ThemeMode::Dark;

        let stored = cache.write(&doc).await.unwrap();
        assert_eq!(stored, doc);
        assert_eq!(cache.read().await.unwrap(), Some(doc));

        cache.clear().await.unwrap();
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_memory_kv_roundtrip() {
        let kv = MemoryKv::new();
        kv.put_raw("a", "1").await.unwrap();
        kv.put_raw("a", "2").await.unwrap();
        assert_eq!(kv.get_raw("a").await.unwrap().as_deref(), Some("2"));
        assert_eq!(kv.len().await, 1);

        kv.remove_raw("a").await.unwrap();
        kv.remove_raw("missing").await.unwrap();
        assert!(kv.is_empty().await);
    }
}
