//! Durable queue of pending remote writes.
//!
//! The queue lives in the structured store under the account's queue key so
//! that it survives restarts and is shared by every tab. Every operation
//! re-reads the persisted list; an in-memory mirror stands in whenever the
//! store cannot be read or written.
//!
//! Writes coalesce: a document supersedes any older pending document, so
//! the queue holds at most one entry in practice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use prefsync_common::{AccountId, PreferenceDocument, Result};
use prefsync_storage::KeyValueStore;

/// Attempts after which a still-failing entry is reported.
pub const DEFAULT_ATTEMPT_WARNING_CAP: u32 = 5;

/// A pending write intent for the remote tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueEntry {
    /// Sequence number, FIFO order.
    pub id: u64,
    pub payload: PreferenceDocument,
    pub enqueued_at: DateTime<Utc>,
    /// Failed delivery attempts so far.
    pub attempts: u32,
}

struct Inner {
    mirror: Vec<SyncQueueEntry>,
    last_issued: u64,
}

/// Offline write queue for one account.
pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    key: String,
    warning_cap: u32,
    inner: Mutex<Inner>,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, account: &AccountId) -> Self {
        Self {
            store,
            key: account.queue_key(),
            warning_cap: DEFAULT_ATTEMPT_WARNING_CAP,
            inner: Mutex::new(Inner {
                mirror: Vec::new(),
                last_issued: 0,
            }),
        }
    }

    pub fn with_warning_cap(mut self, cap: u32) -> Self {
        self.warning_cap = cap;
        self
    }

    async fn load(&self, inner: &mut Inner) -> Vec<SyncQueueEntry> {
        match self.store.get_raw(&self.key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<SyncQueueEntry>>(&raw) {
                Ok(mut entries) => {
                    entries.sort_by_key(|e| e.id);
                    inner.mirror = entries.clone();
                    entries
                }
                Err(e) => {
                    warn!(error = %e, key = %self.key, "Queue blob is corrupt, using in-memory copy");
                    inner.mirror.clone()
                }
            },
            Ok(None) => {
                inner.mirror.clear();
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, store = self.store.name(), "Queue unreadable, using in-memory copy");
                inner.mirror.clone()
            }
        }
    }

    async fn persist(&self, inner: &mut Inner, entries: Vec<SyncQueueEntry>) {
        let result: Result<()> = async {
            if entries.is_empty() {
                self.store.remove_raw(&self.key).await
            } else {
                let raw = serde_json::to_string(&entries)?;
                self.store.put_raw(&self.key, &raw).await
            }
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, store = self.store.name(), "Failed to persist queue, kept in memory");
        }
        inner.mirror = entries;
    }

    /// Record `doc` as pending, replacing any older pending entry.
    ///
    /// An already-queued newer document is kept and returned instead.
    pub async fn enqueue(&self, doc: &PreferenceDocument) -> SyncQueueEntry {
        let mut inner = self.inner.lock().await;
        let mut entries = self.load(&mut inner).await;

        if let Some(newer) = entries
            .iter()
            .find(|e| e.payload.updated_at > doc.updated_at)
        {
            debug!(id = newer.id, "Queue already holds a newer document");
            return newer.clone();
        }

        let max_id = entries.iter().map(|e| e.id).max().unwrap_or(0);
        let id = max_id.max(inner.last_issued) + 1;
        inner.last_issued = id;

        let entry = SyncQueueEntry {
            id,
            payload: doc.clone(),
            enqueued_at: Utc::now(),
            attempts: 0,
        };
        let coalesced = entries.len();
        entries.clear();
        entries.push(entry.clone());

        debug!(id, coalesced, version = doc.version, "Enqueued remote write");
        self.persist(&mut inner, entries).await;
        entry
    }

    /// Oldest pending entry.
    pub async fn peek_oldest(&self) -> Option<SyncQueueEntry> {
        let mut inner = self.inner.lock().await;
        self.load(&mut inner).await.into_iter().next()
    }

    /// Remove an entry after the remote confirmed it.
    ///
    /// Returns `false` if the entry is gone or was replaced meanwhile.
    pub async fn acknowledge(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().await;
        let mut entries = self.load(&mut inner).await;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        if entries.len() == before {
            return false;
        }
        self.persist(&mut inner, entries).await;
        true
    }

    /// Count a failed delivery; returns the new attempt count.
    pub async fn record_failure(&self, id: u64) -> Option<u32> {
        let mut inner = self.inner.lock().await;
        let mut entries = self.load(&mut inner).await;
        let entry = entries.iter_mut().find(|e| e.id == id)?;
        entry.attempts = entry.attempts.saturating_add(1);
        let attempts = entry.attempts;

        if attempts > self.warning_cap {
            warn!(id, attempts, "Queued remote write keeps failing");
        }
        self.persist(&mut inner, entries).await;
        Some(attempts)
    }

    /// Drop entries not newer than a document the remote already holds.
    pub async fn discard_superseded(&self, updated_at: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock().await;
        let mut entries = self.load(&mut inner).await;
        let before = entries.len();
        entries.retain(|e| e.payload.updated_at > updated_at);
        let discarded = before - entries.len();
        if discarded > 0 {
            debug!(discarded, "Discarded superseded queue entries");
            self.persist(&mut inner, entries).await;
        }
        discarded
    }

    pub async fn len(&self) -> usize {
        let mut inner = self.inner.lock().await;
        self.load(&mut inner).await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn entries(&self) -> Vec<SyncQueueEntry> {
        let mut inner = self.inner.lock().await;
        self.load(&mut inner).await
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        self.persist(&mut inner, Vec::new()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use prefsync_common::{Error, ThemeMode};
    use prefsync_storage::{MemoryKv, StructuredStore};

    fn account() -> AccountId {
        AccountId::new("alice").unwrap()
    }

    fn doc(mode: ThemeMode, offset_ms: i64) -> PreferenceDocument {
        let mut d = PreferenceDocument::new_default();
        d.mode = mode;
        d.updated_at += Duration::milliseconds(offset_ms);
        d
    }

    /// Store whose every operation fails.
    struct BrokenStore;

    #[async_trait]
    impl KeyValueStore for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }
        async fn get_raw(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::Storage("unavailable".into()))
        }
        async fn put_raw(&self, _key: &str, _value: &str) -> Result<()> {
            Err(Error::Storage("unavailable".into()))
        }
        async fn remove_raw(&self, _key: &str) -> Result<()> {
            Err(Error::Storage("unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_enqueue_coalesces() {
        let queue = OfflineQueue::new(Arc::new(MemoryKv::new()), &account());
        let first = queue.enqueue(&doc(ThemeMode::Dark, 1)).await;
        let second = queue.enqueue(&doc(ThemeMode::Light, 2)).await;

        assert!(second.id > first.id);
        assert_eq!(queue.len().await, 1);
        let oldest = queue.peek_oldest().await.unwrap();
        assert_eq!(oldest.payload.mode, ThemeMode::Light);
        assert_eq!(oldest.attempts, 0);
    }

    #[tokio::test]
    async fn test_older_document_does_not_replace_newer() {
        let queue = OfflineQueue::new(Arc::new(MemoryKv::new()), &account());
        queue.enqueue(&doc(ThemeMode::Dark, 10)).await;
        let kept = queue.enqueue(&doc(ThemeMode::Light, 5)).await;
        assert_eq!(kept.payload.mode, ThemeMode::Dark);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_acknowledge_only_matching_entry() {
        let queue = OfflineQueue::new(Arc::new(MemoryKv::new()), &account());
        let first = queue.enqueue(&doc(ThemeMode::Dark, 1)).await;
        queue.enqueue(&doc(ThemeMode::Light, 2)).await;

        // The first entry was replaced while "in flight".
        assert!(!queue.acknowledge(first.id).await);
        assert_eq!(queue.len().await, 1);

        let current = queue.peek_oldest().await.unwrap();
        assert!(queue.acknowledge(current.id).await);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_failures_never_drop_entry() {
        let queue =
            OfflineQueue::new(Arc::new(MemoryKv::new()), &account()).with_warning_cap(2);
        let entry = queue.enqueue(&doc(ThemeMode::Dark, 1)).await;
        for expected in 1..=4 {
            assert_eq!(queue.record_failure(entry.id).await, Some(expected));
        }
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.record_failure(999).await, None);
    }

    #[tokio::test]
    async fn test_discard_superseded() {
        let queue = OfflineQueue::new(Arc::new(MemoryKv::new()), &account());
        let entry = queue.enqueue(&doc(ThemeMode::Dark, 10)).await;

        assert_eq!(queue.discard_superseded(entry.payload.updated_at - Duration::milliseconds(1)).await, 0);
        assert_eq!(queue.discard_superseded(entry.payload.updated_at).await, 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_shared_store_between_instances() {
        let store = StructuredStore::in_memory().unwrap();
        let tab_a = OfflineQueue::new(Arc::new(store.clone()), &account());
        let tab_b = OfflineQueue::new(Arc::new(store), &account());

        tab_a.enqueue(&doc(ThemeMode::Dark, 1)).await;
        assert_eq!(tab_b.len().await, 1);

        tab_b.clear().await;
        assert!(tab_a.is_empty().await);
    }

    #[tokio::test]
    async fn test_unreadable_store_falls_back_to_memory() {
        let queue = OfflineQueue::new(Arc::new(BrokenStore), &account());
        queue.enqueue(&doc(ThemeMode::Dark, 1)).await;
        assert_eq!(queue.len().await, 1);

        let entry = queue.peek_oldest().await.unwrap();
        assert!(queue.acknowledge(entry.id).await);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("offline.db");
        {
            let store = StructuredStore::open(&path).unwrap();
            let queue = OfflineQueue::new(Arc::new(store), &account());
            queue.enqueue(&doc(ThemeMode::Light, 1)).await;
        }

        let store = StructuredStore::open(&path).unwrap();
        let queue = OfflineQueue::new(Arc::new(store), &account());
        assert_eq!(queue.peek_oldest().await.unwrap().payload.mode, ThemeMode::Light);
    }
}
