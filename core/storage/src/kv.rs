//! Durable per-browser key-value store (T2).
//!
//! One [`KvBackend`] stands for the storage shared by every tab of a
//! browser profile. Each tab talks to it through its own [`KvStore`]
//! handle, and every change is announced on a broadcast channel tagged
//! with the writing tab, so sibling tabs see it as an external mutation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use prefsync_common::{AccountId, Error, PreferenceDocument, Result, TabId, TierId};

use crate::tier::{decode_document, encode_document, KeyValueStore, StorageTier};

/// Capacity of the change-event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A change to one key, as observed by other tabs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// New value, `None` when the key was removed.
    pub value: Option<String>,
    /// Tab that performed the change.
    pub origin: TabId,
}

/// Shared backing storage with a byte capacity.
pub struct KvBackend {
    /// File the map is persisted to (None keeps it in memory only).
    path: Option<PathBuf>,
    /// Maximum total size of keys and values in bytes.
    capacity: usize,
    entries: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
}

impl KvBackend {
    /// Default capacity: 200 KiB.
    pub const DEFAULT_CAPACITY: usize = 200 * 1024;

    /// Open (or create) a backend persisted at `path`.
    ///
    /// A corrupt file is logged and replaced on the next write rather than
    /// failing the open.
    pub async fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let entries = match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<HashMap<String, String>>(&content) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Key-value file is corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(Error::Io(e)),
        };

        debug!(path = %path.display(), keys = entries.len(), "Opened key-value store");
        Ok(Arc::new(Self::with_entries(Some(path), capacity, entries)))
    }

    /// Create a backend that is never written to disk.
    pub fn in_memory(capacity: usize) -> Arc<Self> {
        Arc::new(Self::with_entries(None, capacity, HashMap::new()))
    }

    fn with_entries(path: Option<PathBuf>, capacity: usize, entries: HashMap<String, String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            path,
            capacity,
            entries: Mutex::new(entries),
            events,
        }
    }

    /// Create a handle for one tab.
    pub fn handle(self: &Arc<Self>, origin: TabId) -> KvStore {
        KvStore {
            backend: self.clone(),
            origin,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently used by keys and values.
    pub async fn used_bytes(&self) -> usize {
        Self::size_of(&*self.entries.lock().await)
    }

    fn size_of(entries: &HashMap<String, String>) -> usize {
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().await.get(key).cloned()
    }

    async fn put(&self, key: &str, value: &str, origin: &TabId) -> Result<()> {
        let mut entries = self.entries.lock().await;

        if entries.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }

        let mut updated = entries.clone();
        updated.insert(key.to_string(), value.to_string());
        let needed = Self::size_of(&updated);
        if needed > self.capacity {
            return Err(Error::QuotaExceeded(format!(
                "writing '{}' needs {} bytes, capacity is {}",
                key, needed, self.capacity
            )));
        }

        self.persist(&updated).await?;
        *entries = updated;
        drop(entries);

        self.announce(key, Some(value.to_string()), origin);
        Ok(())
    }

    async fn remove(&self, key: &str, origin: &TabId) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(key) {
            return Ok(());
        }

        let mut updated = entries.clone();
        updated.remove(key);
        self.persist(&updated).await?;
        *entries = updated;
        drop(entries);

        self.announce(key, None, origin);
        Ok(())
    }

    fn announce(&self, key: &str, value: Option<String>, origin: &TabId) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            value,
            origin: origin.clone(),
        });
    }

    /// Write the map atomically (temp file + rename).
    async fn persist(&self, entries: &HashMap<String, String>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_string(entries)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let tmp = path.with_extension("tmp");

        fs::write(&tmp, json).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::StorageFull {
                Error::QuotaExceeded(format!("disk full writing {}", tmp.display()))
            } else {
                Error::Io(e)
            }
        })?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// One tab's view of a [`KvBackend`].
#[derive(Clone)]
pub struct KvStore {
    backend: Arc<KvBackend>,
    origin: TabId,
}

impl KvStore {
    /// Tab this handle writes as.
    pub fn origin(&self) -> &TabId {
        &self.origin
    }

    pub fn backend(&self) -> &Arc<KvBackend> {
        &self.backend
    }

    /// Subscribe to changes made through any handle, this one included.
    ///
    /// Consumers filter on [`StorageEvent::origin`] to keep external
    /// mutations only.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.backend.events.subscribe()
    }
}

#[async_trait]
impl KeyValueStore for KvStore {
    fn name(&self) -> &str {
        "kv"
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(self.backend.get(key).await)
    }

    async fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        self.backend.put(key, value, &self.origin).await
    }

    async fn remove_raw(&self, key: &str) -> Result<()> {
        self.backend.remove(key, &self.origin).await
    }
}

/// T2: the preference document as an opaque blob in a [`KvStore`].
pub struct KvTier {
    store: KvStore,
    key: String,
}

impl KvTier {
    pub fn new(store: KvStore, account: &AccountId) -> Self {
        Self {
            store,
            key: account.document_key(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl StorageTier for KvTier {
    fn tier(&self) -> TierId {
        TierId::LocalStore
    }

    async fn read(&self) -> Result<Option<PreferenceDocument>> {
        match self.store.get_raw(&self.key).await? {
            Some(raw) => decode_document(&raw).map(Some),
            None => Ok(None),
        }
    }

    async fn write(&self, doc: &PreferenceDocument) -> Result<PreferenceDocument> {
        let raw = encode_document(doc)?;
        self.store.put_raw(&self.key, &raw).await?;
        Ok(doc.clone())
    }

    async fn clear(&self) -> Result<()> {
        self.store.remove_raw(&self.key).await
    }
}
