//! Cross-tab change notifications.
//!
//! Tabs sharing a key-value backend announce saved documents by writing a
//! [`BridgeMessage`] to the account's broadcast key. Sibling tabs pick the
//! write up as a foreign storage event; nobody polls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use prefsync_common::{AccountId, PreferenceDocument, Result, TabId};
use prefsync_storage::{KeyValueStore, KvStore};

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

/// Payload written to the broadcast key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeMessage {
    pub document: PreferenceDocument,
    pub updated_at: DateTime<Utc>,
    /// Tab that saved the document.
    pub origin: TabId,
}

struct Shared {
    store: KvStore,
    key: String,
    /// Latest document waiting for the debounce window to close.
    pending: Mutex<Option<PreferenceDocument>>,
    flush_scheduled: AtomicBool,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<BridgeMessage>>>,
}

impl Shared {
    async fn write(&self, doc: PreferenceDocument) -> Result<()> {
        let message = BridgeMessage {
            updated_at: doc.updated_at,
            document: doc,
            origin: self.store.origin().clone(),
        };
        let raw = serde_json::to_string(&message)?;
        self.store.put_raw(&self.key, &raw).await?;
        debug!(version = message.document.version, "Broadcast preferences to other tabs");
        Ok(())
    }

    fn take_pending(&self) -> Option<PreferenceDocument> {
        self.pending.lock().ok().and_then(|mut p| p.take())
    }

    fn deliver(&self, message: BridgeMessage) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        }
    }
}

/// One tab's endpoint of the cross-tab channel.
pub struct CrossTabBridge {
    shared: Arc<Shared>,
    debounce: Duration,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl CrossTabBridge {
    /// Create a bridge writing through `store` (the tab's own handle).
    pub fn new(store: KvStore, account: &AccountId) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                key: account.broadcast_key(),
                pending: Mutex::new(None),
                flush_scheduled: AtomicBool::new(false),
                subscribers: Mutex::new(Vec::new()),
            }),
            debounce: DEFAULT_DEBOUNCE,
            pump: Mutex::new(None),
        }
    }

    /// Set the debounce window; zero broadcasts every call immediately.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn origin(&self) -> &TabId {
        self.shared.store.origin()
    }

    /// Announce a saved document to the other tabs.
    ///
    /// Calls within the debounce window collapse to the latest document.
    pub async fn broadcast(&self, doc: &PreferenceDocument) -> Result<()> {
        if self.debounce.is_zero() {
            return self.shared.write(doc.clone()).await;
        }

        if let Ok(mut pending) = self.shared.pending.lock() {
            *pending = Some(doc.clone());
        }

        if !self.shared.flush_scheduled.swap(true, Ordering::AcqRel) {
            let shared = self.shared.clone();
            let debounce = self.debounce;
            tokio::spawn(async move {
                tokio::time::sleep(debounce).await;
                shared.flush_scheduled.store(false, Ordering::Release);
                if let Some(doc) = shared.take_pending() {
                    if let Err(e) = shared.write(doc).await {
                        warn!(error = %e, "Cross-tab broadcast failed");
                    }
                }
            });
        }
        Ok(())
    }

    /// Write any pending document now instead of waiting for the window.
    pub async fn flush(&self) -> Result<()> {
        match self.shared.take_pending() {
            Some(doc) => self.shared.write(doc).await,
            None => Ok(()),
        }
    }

    /// Receive messages broadcast by other tabs.
    ///
    /// Starts the event pump on first use; must be called within a Tokio
    /// runtime.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<BridgeMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.shared.subscribers.lock() {
            subscribers.push(tx);
        }
        self.start();
        rx
    }

    fn start(&self) {
        let Ok(mut pump) = self.pump.lock() else {
            return;
        };
        if pump.is_some() {
            return;
        }

        let shared = self.shared.clone();
        let mut events = shared.store.subscribe();
        *pump = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if event.key != shared.key || &event.origin == shared.store.origin() {
                            continue;
                        }
                        let Some(raw) = event.value else {
                            continue;
                        };
                        match serde_json::from_str::<BridgeMessage>(&raw) {
                            Ok(message) => shared.deliver(message),
                            Err(e) => warn!(error = %e, "Ignoring malformed cross-tab message"),
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Cross-tab listener lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }
}

impl Drop for CrossTabBridge {
    fn drop(&mut self) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(handle) = pump.take() {
                handle.abort();
            }
        }
    }
}
