//! In-process remote store.
//!
//! A [`MemoryRemoteServer`] plays the account's backend; every device
//! connects to it with its own [`MemoryRemote`] handle. Failures, latency
//! and expired sessions can be injected to exercise the offline paths.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use prefsync_common::{
    DeviceIdentity, Error, PreferenceDocument, PutPreferences, RemoteEnvelope, Result, TierId,
};

use crate::tier::StorageTier;

/// Shared state of the fake backend.
#[derive(Default)]
pub struct MemoryRemoteServer {
    stored: Mutex<Option<RemoteEnvelope>>,
    reconcile_clock: AtomicBool,
    unauthenticated: AtomicBool,
    fail_next: AtomicUsize,
    latency_ms: AtomicU64,
    /// Offset of the server clock ahead of the client's.
    clock_ahead_ms: AtomicU64,
    writes: AtomicUsize,
}

impl MemoryRemoteServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stamp stored documents with `max(server_now, client updatedAt)`.
    pub fn with_clock_reconciliation() -> Arc<Self> {
        let server = Self::default();
        server.reconcile_clock.store(true, Ordering::SeqCst);
        Arc::new(server)
    }

    /// Reconcile against a server clock running `ahead` of the client's.
    pub fn with_clock_ahead(ahead: Duration) -> Arc<Self> {
        let server = Self::default();
        server.reconcile_clock.store(true, Ordering::SeqCst);
        server
            .clock_ahead_ms
            .store(ahead.as_millis() as u64, Ordering::SeqCst);
        Arc::new(server)
    }

    /// Connect one device.
    pub fn connect(self: &Arc<Self>, identity: DeviceIdentity) -> MemoryRemote {
        MemoryRemote {
            server: self.clone(),
            identity,
        }
    }

    /// Fail the next `n` requests with a network error.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Reject every request as unauthenticated while set.
    pub fn set_unauthenticated(&self, value: bool) {
        self.unauthenticated.store(value, Ordering::SeqCst);
    }

    /// Delay every request by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of accepted writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Currently stored envelope.
    pub fn stored(&self) -> Option<RemoteEnvelope> {
        self.stored.lock().ok().and_then(|s| s.clone())
    }

    /// Currently stored document.
    pub fn document(&self) -> Option<PreferenceDocument> {
        self.stored().map(|e| e.document)
    }

    async fn gate(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.unauthenticated.load(Ordering::SeqCst) {
            return Err(Error::Unauthenticated("session expired".to_string()));
        }

        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::Network("injected failure".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<RemoteEnvelope>>> {
        self.stored
            .lock()
            .map_err(|_| Error::Storage("remote state lock poisoned".to_string()))
    }

    fn put(&self, request: PutPreferences) -> Result<RemoteEnvelope> {
        let ahead = chrono::Duration::milliseconds(self.clock_ahead_ms.load(Ordering::SeqCst) as i64);
        let server_now = self
            .reconcile_clock
            .load(Ordering::SeqCst)
            .then(|| Utc::now() + ahead);
        let envelope = request.into_envelope(server_now);

        *self.lock()? = Some(envelope.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(envelope)
    }
}

/// One device's connection to a [`MemoryRemoteServer`].
#[derive(Clone)]
pub struct MemoryRemote {
    server: Arc<MemoryRemoteServer>,
    identity: DeviceIdentity,
}

impl MemoryRemote {
    pub fn server(&self) -> &Arc<MemoryRemoteServer> {
        &self.server
    }
}

#[async_trait]
impl StorageTier for MemoryRemote {
    fn tier(&self) -> TierId {
        TierId::Remote
    }

    async fn read(&self) -> Result<Option<PreferenceDocument>> {
        self.server.gate().await?;
        Ok(self.server.lock()?.clone().map(RemoteEnvelope::into_canonical))
    }

    async fn write(&self, doc: &PreferenceDocument) -> Result<PreferenceDocument> {
        self.server.gate().await?;
        let envelope = self.server.put(PutPreferences {
            document: doc.clone(),
            device_id: self.identity.id.clone(),
            device_type: self.identity.device_type,
        })?;
        Ok(envelope.into_canonical())
    }

    async fn clear(&self) -> Result<()> {
        self.server.gate().await?;
        *self.server.lock()? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use prefsync_common::{DeviceType, ErrorKind, ThemeMode};

    fn device() -> DeviceIdentity {
        DeviceIdentity::generate(DeviceType::Desktop)
    }

    #[tokio::test]
    async fn test_devices_share_server() {
        let server = MemoryRemoteServer::new();
        let phone = server.connect(DeviceIdentity::generate(DeviceType::Mobile));
        let laptop = server.connect(device());

        let mut doc = PreferenceDocument::new_default();
        doc.mode = ThemeMode::Light;
        phone.write(&doc).await.unwrap();

        assert_eq!(laptop.read().await.unwrap(), Some(doc));
        assert_eq!(server.write_count(), 1);
        assert_eq!(
            server.stored().unwrap().device_id,
            phone.identity.id
        );
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let server = MemoryRemoteServer::new();
        let remote = server.connect(device());
        server.fail_next(2);

        let doc = PreferenceDocument::new_default();
        assert_eq!(remote.write(&doc).await.unwrap_err().kind(), ErrorKind::Network);
        assert_eq!(remote.read().await.unwrap_err().kind(), ErrorKind::Network);
        assert!(remote.write(&doc).await.is_ok());
    }

    #[tokio::test]
    async fn test_unauthenticated() {
        let server = MemoryRemoteServer::new();
        let remote = server.connect(device());
        server.set_unauthenticated(true);
        assert_eq!(
            remote.read().await.unwrap_err().kind(),
            ErrorKind::Unauthenticated
        );
        server.set_unauthenticated(false);
        assert!(remote.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clock_reconciliation() {
        let server = MemoryRemoteServer::with_clock_reconciliation();
        let remote = server.connect(device());

        // A client clock running an hour behind.
        let doc = PreferenceDocument::default_at(Utc::now() - ChronoDuration::hours(1));
        let stored = remote.write(&doc).await.unwrap();
        assert!(stored.updated_at > doc.updated_at);
        assert_eq!(stored.version, doc.version);
    }

    #[tokio::test]
    async fn test_clock_ahead_stamps_into_the_future() {
        let server = MemoryRemoteServer::with_clock_ahead(Duration::from_secs(10));
        let remote = server.connect(device());

        let doc = PreferenceDocument::new_default();
        let stored = remote.write(&doc).await.unwrap();
        assert!(stored.updated_at >= doc.updated_at + ChronoDuration::seconds(9));
        assert_eq!(server.document().unwrap().updated_at, stored.updated_at);
    }
}
