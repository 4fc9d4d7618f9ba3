//! Storage tier trait definitions.

use async_trait::async_trait;

use prefsync_common::{PreferenceDocument, Result, TierId};

/// Uniform contract over the four storage backends.
///
/// Every operation is async, including tiers that are synchronous
/// underneath, so the orchestrator can fan out over all of them alike.
/// Failures are returned, never panicked, and are independent per tier.
#[async_trait]
pub trait StorageTier: Send + Sync {
    /// Which tier this backend plays.
    fn tier(&self) -> TierId;

    /// Read the stored document.
    ///
    /// # Returns
    /// `None` when the tier holds no document.
    ///
    /// # Errors
    /// - `Parse` when the stored blob cannot be decoded
    /// - `Network`/`Timeout`/`Unauthenticated` for the remote tier
    async fn read(&self) -> Result<Option<PreferenceDocument>>;

    /// Overwrite the stored document as a whole.
    ///
    /// # Postconditions
    /// - Returns the copy the tier now holds. Local tiers return `doc`
    ///   unchanged; the remote tier may return a canonical copy with a
    ///   server-corrected `updated_at`.
    ///
    /// # Errors
    /// - `QuotaExceeded` when a durable tier rejects the size
    async fn write(&self, doc: &PreferenceDocument) -> Result<PreferenceDocument>;

    /// Remove the stored document. Clearing an empty tier succeeds.
    async fn clear(&self) -> Result<()>;
}

/// Raw string blobs under string keys.
///
/// Implemented by the durable stores so the queue and the device identity
/// can be persisted next to the document.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Backend name for logs (e.g., "kv", "sqlite", "memory").
    fn name(&self) -> &str;

    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    async fn put_raw(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing a missing key succeeds.
    async fn remove_raw(&self, key: &str) -> Result<()>;
}

/// Decode a stored document blob.
pub fn decode_document(raw: &str) -> Result<PreferenceDocument> {
    serde_json::from_str(raw).map_err(|e| prefsync_common::Error::Parse(e.to_string()))
}

/// Encode a document for storage.
pub fn encode_document(doc: &PreferenceDocument) -> Result<String> {
    serde_json::to_string(doc)
        .map_err(|e| prefsync_common::Error::Serialization(e.to_string()))
}
