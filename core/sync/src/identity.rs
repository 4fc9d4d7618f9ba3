//! Per-installation device identity.

use std::sync::Arc;
use tracing::{info, warn};

use prefsync_common::{DeviceIdentity, DeviceType, DEVICE_IDENTITY_KEY};
use prefsync_storage::KeyValueStore;

/// Loads, creates and persists the [`DeviceIdentity`].
///
/// The identity is kept in both durable stores; either copy is enough to
/// restore it. Preference `clear()` never touches it.
pub struct DeviceIdentityStore {
    offline: Arc<dyn KeyValueStore>,
    local: Arc<dyn KeyValueStore>,
}

impl DeviceIdentityStore {
    /// `offline` is read first, `local` second.
    pub fn new(offline: Arc<dyn KeyValueStore>, local: Arc<dyn KeyValueStore>) -> Self {
        Self { offline, local }
    }

    async fn read_from(store: &dyn KeyValueStore) -> Option<DeviceIdentity> {
        match store.get_raw(DEVICE_IDENTITY_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    warn!(store = store.name(), error = %e, "Stored device identity is corrupt");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(store = store.name(), error = %e, "Failed to read device identity");
                None
            }
        }
    }

    async fn write_to(store: &dyn KeyValueStore, identity: &DeviceIdentity) {
        let raw = match serde_json::to_string(identity) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Failed to encode device identity");
                return;
            }
        };
        if let Err(e) = store.put_raw(DEVICE_IDENTITY_KEY, &raw).await {
            warn!(store = store.name(), error = %e, "Failed to persist device identity");
        }
    }

    /// Return the stored identity, creating one on first use.
    ///
    /// `device_type` only applies when a new identity is generated.
    pub async fn load_or_create(&self, device_type: DeviceType) -> DeviceIdentity {
        let offline = Self::read_from(self.offline.as_ref()).await;
        let local = Self::read_from(self.local.as_ref()).await;

        match (offline, local) {
            (Some(identity), local) => {
                if local.as_ref() != Some(&identity) {
                    Self::write_to(self.local.as_ref(), &identity).await;
                }
                identity
            }
            (None, Some(identity)) => {
                Self::write_to(self.offline.as_ref(), &identity).await;
                identity
            }
            (None, None) => {
                let identity = DeviceIdentity::generate(device_type);
                info!(device_id = %identity.id, device_type = %identity.device_type, "Generated device identity");
                Self::write_to(self.offline.as_ref(), &identity).await;
                Self::write_to(self.local.as_ref(), &identity).await;
                identity
            }
        }
    }

    /// Delete the identity from both stores.
    pub async fn forget(&self) {
        for store in [&self.offline, &self.local] {
            if let Err(e) = store.remove_raw(DEVICE_IDENTITY_KEY).await {
                warn!(store = store.name(), error = %e, "Failed to remove device identity");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prefsync_storage::MemoryKv;

    fn stores() -> (Arc<MemoryKv>, Arc<MemoryKv>) {
        (Arc::new(MemoryKv::new()), Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn test_generated_once() {
        let (offline, local) = stores();
        let store = DeviceIdentityStore::new(offline.clone(), local.clone());

        let first = store.load_or_create(DeviceType::Mobile).await;
        let second = store.load_or_create(DeviceType::Desktop).await;
        assert_eq!(first, second);
        assert_eq!(second.device_type, DeviceType::Mobile);
        assert!(offline.get_raw(DEVICE_IDENTITY_KEY).await.unwrap().is_some());
        assert!(local.get_raw(DEVICE_IDENTITY_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_restored_from_either_store() {
        let (offline, local) = stores();
        let store = DeviceIdentityStore::new(offline.clone(), local.clone());
        let identity = store.load_or_create(DeviceType::Tablet).await;

        offline.remove_raw(DEVICE_IDENTITY_KEY).await.unwrap();
        assert_eq!(store.load_or_create(DeviceType::Desktop).await, identity);
        // Copied back.
        assert!(offline.get_raw(DEVICE_IDENTITY_KEY).await.unwrap().is_some());

        local.remove_raw(DEVICE_IDENTITY_KEY).await.unwrap();
        assert_eq!(store.load_or_create(DeviceType::Desktop).await, identity);
        assert!(local.get_raw(DEVICE_IDENTITY_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_forget_regenerates() {
        let (offline, local) = stores();
        let store = DeviceIdentityStore::new(offline, local);
        let identity = store.load_or_create(DeviceType::Desktop).await;

        store.forget().await;
        assert_ne!(store.load_or_create(DeviceType::Desktop).await.id, identity.id);
    }
}
