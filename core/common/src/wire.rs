//! Remote preferences API payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::DeviceType;
use crate::document::PreferenceDocument;

/// Header carrying the writing device id.
pub const DEVICE_ID_HEADER: &str = "x-device-id";
/// Header carrying the writing device type.
pub const DEVICE_TYPE_HEADER: &str = "x-device-type";

/// What the remote store holds for an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEnvelope {
    pub document: PreferenceDocument,
    /// Device that performed the last write.
    pub device_id: String,
    /// Canonical timestamp assigned by the server.
    pub updated_at: DateTime<Utc>,
}

impl RemoteEnvelope {
    /// Document with its `updated_at` set to the canonical timestamp.
    pub fn into_canonical(self) -> PreferenceDocument {
        let mut document = self.document;
        document.updated_at = self.updated_at;
        document
    }
}

/// Body of `PUT /preferences`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutPreferences {
    pub document: PreferenceDocument,
    pub device_id: String,
    pub device_type: DeviceType,
}

impl PutPreferences {
    /// Build the envelope the server stores.
    ///
    /// With `server_now` set, the stored timestamp is
    /// `max(server_now, document.updated_at)`.
    pub fn into_envelope(self, server_now: Option<DateTime<Utc>>) -> RemoteEnvelope {
        let updated_at = match server_now {
            Some(now) => now.max(self.document.updated_at),
            None => self.document.updated_at,
        };
        let mut document = self.document;
        document.updated_at = updated_at;
        RemoteEnvelope {
            document,
            device_id: self.device_id,
            updated_at,
        }
    }
}
