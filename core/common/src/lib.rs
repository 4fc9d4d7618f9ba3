//! Common utilities and types shared across PrefSync modules.
//!
//! This module provides the preference data model, identifiers and the
//! error taxonomy used by every tier and by the sync engine.

pub mod device;
pub mod document;
pub mod error;
pub mod types;
pub mod wire;

pub use device::{DeviceIdentity, DeviceType};
pub use document::{
    Accessibility, AccessibilityPatch, Animations, AnimationsPatch, Contrast, FontSize,
    PreferenceDocument, PreferencePatch, ThemeMode,
};
pub use error::{Error, ErrorKind, Result};
pub use types::{AccountId, TabId, TierFailure, TierId, TierOutcome, DEVICE_IDENTITY_KEY};
pub use wire::{PutPreferences, RemoteEnvelope, DEVICE_ID_HEADER, DEVICE_TYPE_HEADER};
