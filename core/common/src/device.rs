//! Per-installation device identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Coarse device classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceType {
    /// Classify a device from a user-agent style string.
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if ua.contains("ipad") || ua.contains("tablet") {
            DeviceType::Tablet
        } else if ua.contains("mobi") || ua.contains("android") || ua.contains("iphone") {
            DeviceType::Mobile
        } else {
            DeviceType::Desktop
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeviceType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "desktop" => Ok(DeviceType::Desktop),
            "mobile" => Ok(DeviceType::Mobile),
            "tablet" => Ok(DeviceType::Tablet),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown device type: {}",
                other
            ))),
        }
    }
}

/// Stable identifier of one installation. Metadata only, never a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub id: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub created_at: DateTime<Utc>,
}

impl DeviceIdentity {
    /// Generate a fresh identity.
    pub fn generate(device_type: DeviceType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            device_type,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            DeviceType::from_user_agent("Mozilla/5.0 (iPad; CPU OS 17_0)"),
            DeviceType::Tablet
        );
        assert_eq!(
            DeviceType::from_user_agent("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0) Mobile"),
            DeviceType::Mobile
        );
        assert_eq!(
            DeviceType::from_user_agent("Mozilla/5.0 (Linux; Android 14)"),
            DeviceType::Mobile
        );
        assert_eq!(
            DeviceType::from_user_agent("Mozilla/5.0 (X11; Linux x86_64)"),
            DeviceType::Desktop
        );
    }

    #[test]
    fn test_generated_ids_differ() {
        let a = DeviceIdentity::generate(DeviceType::Desktop);
        let b = DeviceIdentity::generate(DeviceType::Desktop);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_identity_json_uses_type_field() {
        let identity = DeviceIdentity::generate(DeviceType::Tablet);
        let value = serde_json::to_value(&identity).unwrap();
        assert_eq!(value["type"], "tablet");
        assert!(value["createdAt"].is_string());
    }

    #[test]
    fn test_parse_device_type() {
        assert_eq!("mobile".parse::<DeviceType>().unwrap(), DeviceType::Mobile);
        assert!("toaster".parse::<DeviceType>().is_err());
    }
}
