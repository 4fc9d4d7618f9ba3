//! The synchronized preference document and its partial-update form.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Requested appearance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FontSize {
    Small,
    #[default]
    Medium,
    Large,
    ExtraLarge,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Contrast {
    #[default]
    Normal,
    High,
}

/// Accessibility settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accessibility {
    pub font_size: FontSize,
    pub contrast: Contrast,
    pub focus_visible: bool,
}

impl Default for Accessibility {
    fn default() -> Self {
        Self {
            font_size: FontSize::Medium,
            contrast: Contrast::Normal,
            focus_visible: true,
        }
    }
}

/// Motion settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Animations {
    pub reduced_motion: bool,
}

/// The per-account preference record kept consistent across tiers.
///
/// `version` counts local mutations on one device and is not comparable
/// across devices; `updated_at` is the conflict tiebreak everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceDocument {
    pub mode: ThemeMode,
    pub accessibility: Accessibility,
    pub animations: Animations,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl PreferenceDocument {
    /// Version of a freshly created document.
    pub const INITIAL_VERSION: u64 = 1;

    /// Create the default document stamped with the current time.
    pub fn new_default() -> Self {
        Self::default_at(Utc::now())
    }

    /// Create the default document stamped with `updated_at`.
    pub fn default_at(updated_at: DateTime<Utc>) -> Self {
        Self {
            mode: ThemeMode::default(),
            accessibility: Accessibility::default(),
            animations: Animations::default(),
            version: Self::INITIAL_VERSION,
            updated_at,
        }
    }

    /// Apply a partial update to the preference fields.
    ///
    /// `version` and `updated_at` are left alone; see [`Self::bump`].
    pub fn apply(&mut self, patch: &PreferencePatch) {
        if let Some(mode) = patch.mode {
            self.mode = mode;
        }
        if let Some(a11y) = &patch.accessibility {
            if let Some(font_size) = a11y.font_size {
                self.accessibility.font_size = font_size;
            }
            if let Some(contrast) = a11y.contrast {
                self.accessibility.contrast = contrast;
            }
            if let Some(focus_visible) = a11y.focus_visible {
                self.accessibility.focus_visible = focus_visible;
            }
        }
        if let Some(animations) = &patch.animations {
            if let Some(reduced_motion) = animations.reduced_motion {
                self.animations.reduced_motion = reduced_motion;
            }
        }
    }

    /// Record a local mutation: increment `version` and move `updated_at`
    /// strictly forward, to `now` or one millisecond past the previous stamp.
    pub fn bump(&mut self, now: DateTime<Utc>) {
        self.version = self.version.saturating_add(1);
        let floor = self.updated_at + Duration::milliseconds(1);
        self.updated_at = if now > floor { now } else { floor };
    }

    /// Whether the preference fields match, ignoring `version` and `updated_at`.
    pub fn same_values(&self, other: &Self) -> bool {
        self.mode == other.mode
            && self.accessibility == other.accessibility
            && self.animations == other.animations
    }
}

impl Default for PreferenceDocument {
    fn default() -> Self {
        Self::new_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibilityPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<FontSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contrast: Option<Contrast>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_visible: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduced_motion: Option<bool>,
}

/// Partial update accepted by `save`. Absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ThemeMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessibility: Option<AccessibilityPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animations: Option<AnimationsPatch>,
}

impl PreferencePatch {
    pub fn with_mode(mut self, mode: ThemeMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_font_size(mut self, font_size: FontSize) -> Self {
        self.accessibility.get_or_insert_with(Default::default).font_size = Some(font_size);
        self
    }

    pub fn with_contrast(mut self, contrast: Contrast) -> Self {
        self.accessibility.get_or_insert_with(Default::default).contrast = Some(contrast);
        self
    }

    pub fn with_focus_visible(mut self, focus_visible: bool) -> Self {
        self.accessibility.get_or_insert_with(Default::default).focus_visible =
            Some(focus_visible);
        self
    }

    pub fn with_reduced_motion(mut self, reduced_motion: bool) -> Self {
        self.animations.get_or_insert_with(Default::default).reduced_motion =
            Some(reduced_motion);
        self
    }

    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_document() {
        let doc = PreferenceDocument::new_default();
        assert_eq!(doc.mode, ThemeMode::Auto);
        assert_eq!(doc.accessibility.font_size, FontSize::Medium);
        assert_eq!(doc.accessibility.contrast, Contrast::Normal);
        assert!(doc.accessibility.focus_visible);
        assert!(!doc.animations.reduced_motion);
        assert_eq!(doc.version, 1);
    }

    #[test]
    fn test_json_shape() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let mut doc = PreferenceDocument::default_at(at);
        doc.accessibility.font_size = FontSize::ExtraLarge;

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["mode"], "auto");
        assert_eq!(value["accessibility"]["fontSize"], "extra-large");
        assert_eq!(value["accessibility"]["focusVisible"], true);
        assert_eq!(value["animations"]["reducedMotion"], false);
        assert_eq!(value["version"], 1);
        assert!(value["updatedAt"].is_string());
    }

    #[test]
    fn test_apply_patch_only_touches_given_fields() {
        let mut doc = PreferenceDocument::new_default();
        let before = doc.clone();

        doc.apply(&PreferencePatch::default().with_mode(ThemeMode::Dark).with_contrast(Contrast::High));

        assert_eq!(doc.mode, ThemeMode::Dark);
        assert_eq!(doc.accessibility.contrast, Contrast::High);
        assert_eq!(doc.accessibility.font_size, before.accessibility.font_size);
        assert_eq!(doc.version, before.version);
        assert_eq!(doc.updated_at, before.updated_at);
    }

    #[test]
    fn test_patch_from_partial_json() {
        let patch: PreferencePatch =
            serde_json::from_str(r#"{"accessibility":{"fontSize":"large"}}"#).unwrap();
        assert_eq!(patch.mode, None);
        assert_eq!(
            patch.accessibility.unwrap().font_size,
            Some(FontSize::Large)
        );
        assert!(PreferencePatch::default().is_empty());
    }

    #[test]
    fn test_bump_is_strictly_monotonic() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let mut doc = PreferenceDocument::default_at(at);

        // Clock went backwards.
        doc.bump(at - Duration::seconds(10));
        assert_eq!(doc.version, 2);
        assert_eq!(doc.updated_at, at + Duration::milliseconds(1));

        let later = at + Duration::seconds(5);
        doc.bump(later);
        assert_eq!(doc.version, 3);
        assert_eq!(doc.updated_at, later);
    }

    #[test]
    fn test_bump_saturates_version() {
        let mut doc = PreferenceDocument::new_default();
        doc.version = u64::MAX;
        let before = doc.updated_at;
        doc.bump(Utc::now());
        assert_eq!(doc.version, u64::MAX);
        assert!(doc.updated_at > before);
    }

    #[test]
    fn test_same_values_ignores_stamps() {
        let a = PreferenceDocument::new_default();
        let mut b = a.clone();
        b.bump(Utc::now());
        assert!(a.same_values(&b));
        assert_ne!(a, b);
    }
}
