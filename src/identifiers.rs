//! Type-safe identifiers and identifier derivation.
//!
//! Newtype wrappers prevent mixing configuration ids, tab ids and engine
//! script ids at compile time. Engine script ids are derived
//! deterministically from `(config id, item identity)` so a freshly
//! started background process can recompute them without any persisted
//! table.
//!
//! | Function | Purpose |
//! |----------|---------|
//! | [`make_identifier`] | Sanitize to `[A-Za-z0-9_]`, collapse and trim `_` |
//! | [`item_identity`] | File path, or base64 of inline code |
//! | [`script_engine_id`] | `usersite_<config>_<item>` sanitized |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use serde::{Deserialize, Serialize};

use crate::config::ItemSource;

// ============================================================================
// Constants
// ============================================================================

/// Prefix shared by every derived identifier.
pub const IDENTIFIER_PREFIX: &str = "usersite";

/// Length of the random suffix used by [`ConfigId::generate`].
const GENERATED_SUFFIX_LEN: usize = 8;

// ============================================================================
// Derivation
// ============================================================================

/// Makes a storage-safe identifier.
///
/// Every character outside `[A-Za-z0-9_]` becomes `_`, runs of `_` collapse
/// to one, and leading/trailing `_` are stripped. Total and deterministic.
#[must_use]
pub fn make_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_underscore = false;

    for ch in raw.chars() {
        let ch = if ch.is_ascii_alphanumeric() { ch } else { '_' };
        if ch == '_' {
            if last_underscore {
                continue;
            }
            last_underscore = true;
        } else {
            last_underscore = false;
        }
        out.push(ch);
    }

    out.trim_matches('_').to_string()
}

/// Identity of an injectable item.
///
/// The file path when the item references a file, otherwise the base64
/// encoding of its inline code.
#[must_use]
pub fn item_identity(source: &ItemSource) -> String {
    match source {
        ItemSource::File(path) => path.clone(),
        ItemSource::Inline(code) => Base64Standard.encode(code.as_bytes()),
    }
}

/// Engine id for an item of a configuration.
///
/// Distinct file names that sanitize to the same string (`a.b` and `a_b`)
/// collide; that risk is accepted.
#[must_use]
pub fn script_engine_id(config_id: &ConfigId, identity: &str) -> ScriptId {
    ScriptId(make_identifier(&format!(
        "{IDENTIFIER_PREFIX}_{config_id}_{identity}"
    )))
}

// ============================================================================
// ConfigId
// ============================================================================

/// Unique key of a configuration in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigId(String);

impl ConfigId {
    /// Wraps an existing id.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives the id used by the dashboard for a configuration name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(make_identifier(&format!("{IDENTIFIER_PREFIX}_{name}")))
    }

    /// Generates a fresh slug id: lowercase name plus a random suffix.
    #[must_use]
    pub fn generate(name: &str) -> Self {
        let slug: String = name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{slug}-{}", &suffix[..GENERATED_SUFFIX_LEN]))
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConfigId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// TabId
// ============================================================================

/// Browser tab identifier.
///
/// Zero is never a valid tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(u32);

impl TabId {
    /// Creates a tab id, returning `None` for zero.
    #[inline]
    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        (id != 0).then_some(Self(id))
    }

    /// Returns the raw tab id.
    #[inline]
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ScriptId
// ============================================================================

/// Id of a script registered with the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptId(String);

impl ScriptId {
    /// Wraps an engine id.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_make_identifier_sanitizes() {
        assert_eq!(make_identifier("My Site!"), "My_Site");
        assert_eq!(make_identifier("__a..b__"), "a_b");
        assert_eq!(make_identifier("lib/jquery-3.7.min.js"), "lib_jquery_3_7_min_js");
        assert_eq!(make_identifier("***"), "");
    }

    #[test]
    fn test_item_identity_file_and_inline() {
        let file = ItemSource::File("main.js".to_string());
        assert_eq!(item_identity(&file), "main.js");

        let a = item_identity(&ItemSource::Inline("alert(1)".to_string()));
        let b = item_identity(&ItemSource::Inline("alert(2)".to_string()));
        assert_ne!(a, b);
        assert_eq!(a, item_identity(&ItemSource::Inline("alert(1)".to_string())));
    }

    #[test]
    fn test_script_engine_id() {
        let id = script_engine_id(&ConfigId::new("demo"), "js/main.js");
        assert_eq!(id.as_str(), "usersite_demo_js_main_js");
    }

    #[test]
    fn test_known_collision_is_deterministic() {
        let config = ConfigId::new("demo");
        assert_eq!(
            script_engine_id(&config, "a.b"),
            script_engine_id(&config, "a_b")
        );
    }

    #[test]
    fn test_config_id_from_name() {
        assert_eq!(ConfigId::from_name("My Site").as_str(), "usersite_My_Site");
    }

    #[test]
    fn test_config_id_generate() {
        let id = ConfigId::generate("My Site");
        assert!(id.as_str().starts_with("my-site-"));
        assert_eq!(id.as_str().len(), "my-site-".len() + GENERATED_SUFFIX_LEN);
        assert_ne!(id, ConfigId::generate("My Site"));
    }

    #[test]
    fn test_tab_id_rejects_zero() {
        assert!(TabId::new(0).is_none());
        assert_eq!(TabId::new(7).map(|t| t.as_u32()), Some(7));
    }

    proptest! {
        #[test]
        fn prop_make_identifier_alphabet(raw in ".*") {
            let id = make_identifier(&raw);
            prop_assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
            prop_assert!(!id.starts_with('_'));
            prop_assert!(!id.ends_with('_'));
            prop_assert!(!id.contains("__"));
        }

        #[test]
        fn prop_make_identifier_idempotent(raw in ".*") {
            let once = make_identifier(&raw);
            prop_assert_eq!(make_identifier(&once), once.clone());
        }
    }
}
