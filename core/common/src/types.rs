//! Common types used throughout PrefSync.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, ErrorKind};

/// Storage key holding the device identity in the durable tiers.
pub const DEVICE_IDENTITY_KEY: &str = "prefsync:device_identity";

/// Identifier of the account whose preferences are synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create a new AccountId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty or contains ':' (the key separator)
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidInput("AccountId cannot be empty".to_string()));
        }
        if id.contains(':') {
            return Err(Error::InvalidInput(
                "AccountId cannot contain ':'".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the preference document.
    pub fn document_key(&self) -> String {
        format!("prefsync:{}:preferences", self.0)
    }

    /// Key of the offline write queue.
    pub fn queue_key(&self) -> String {
        format!("prefsync:{}:sync_queue", self.0)
    }

    /// Key used as the cross-tab notification channel.
    pub fn broadcast_key(&self) -> String {
        format!("prefsync:{}:broadcast", self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one execution context ("tab") sharing the durable stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(String);

impl TabId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The four storage tiers, ordered by tie-break priority (lowest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TierId {
    /// T1: ephemeral tab-scoped cache.
    #[serde(rename = "T1")]
    TabCache,
    /// T2: durable per-browser key-value store.
    #[serde(rename = "T2")]
    LocalStore,
    /// T3: durable per-browser structured store.
    #[serde(rename = "T3")]
    OfflineStore,
    /// T4: remote account-scoped store.
    #[serde(rename = "T4")]
    Remote,
}

impl TierId {
    /// All tiers in report order.
    pub const ALL: [TierId; 4] = [
        TierId::TabCache,
        TierId::LocalStore,
        TierId::OfflineStore,
        TierId::Remote,
    ];

    pub fn is_local(&self) -> bool {
        !matches!(self, TierId::Remote)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TierId::TabCache => "T1",
            TierId::LocalStore => "T2",
            TierId::OfflineStore => "T3",
            TierId::Remote => "T4",
        }
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a tier operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for TierFailure {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Per-tier result of a fan-out operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierOutcome {
    pub tier: TierId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TierFailure>,
}

impl TierOutcome {
    pub fn ok(tier: TierId) -> Self {
        Self {
            tier,
            success: true,
            error: None,
        }
    }

    pub fn failed(tier: TierId, err: &Error) -> Self {
        Self {
            tier,
            success: false,
            error: Some(err.into()),
        }
    }

    pub fn from_result<T>(tier: TierId, result: &crate::Result<T>) -> Self {
        match result {
            Ok(_) => Self::ok(tier),
            Err(e) => Self::failed(tier, e),
        }
    }

    /// Error kind of a failed outcome.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
