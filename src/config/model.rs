//! Site configuration data model.
//!
//! A [`Configuration`] maps match patterns to JS/CSS items. Items are a
//! tagged [`Item`] (file or inline code) plus optional per-item overrides;
//! defaults merge as `built-in < config default < item`, see
//! [`JsOptions::resolve`] and [`CssOptions::resolve`].
//!
//! # JSON Format
//!
//! ```json
//! {
//!   "name": "demo",
//!   "matches": ["*://example.com/*"],
//!   "js": ["main.js", {"code": "console.log(1)", "runAt": "document_start"}],
//!   "css": [{"file": "style.css", "injectAt": "head"}],
//!   "jsDefault": {"world": "MAIN"},
//!   "enabled": true
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::cache::is_http_url;
use crate::error::{Error, Result};
use crate::identifiers::{ConfigId, item_identity};

use super::matcher::matches_any;

// ============================================================================
// Configuration
// ============================================================================

/// A user-defined rule mapping URL patterns to injectable resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Store key; set by the store on add.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ConfigId>,

    /// Display name (required).
    #[serde(default)]
    pub name: String,

    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Gates all matching and injection; defaulted to `true` on add.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Ordered match patterns. Accepts a single string.
    #[serde(default, deserialize_with = "one_or_many")]
    pub matches: Vec<String>,

    /// JS items.
    #[serde(default)]
    pub js: Vec<JsItem>,

    /// CSS items.
    #[serde(default)]
    pub css: Vec<CssItem>,

    /// Defaults merged under every JS item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub js_default: Option<JsOptions>,

    /// Defaults merged under every CSS item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css_default: Option<CssOptions>,

    /// Where the file blobs come from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

impl Configuration {
    /// Creates a configuration with a name and no items.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds a match pattern.
    #[must_use]
    pub fn with_match(mut self, pattern: impl Into<String>) -> Self {
        self.matches.push(pattern.into());
        self
    }

    /// Adds a JS item.
    #[must_use]
    pub fn with_js(mut self, item: JsItem) -> Self {
        self.js.push(item);
        self
    }

    /// Adds a CSS item.
    #[must_use]
    pub fn with_css(mut self, item: CssItem) -> Self {
        self.css.push(item);
        self
    }

    /// Returns `true` only when explicitly enabled.
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled == Some(true)
    }

    /// Returns `true` if any pattern matches `url`.
    ///
    /// A configuration without patterns never matches.
    #[must_use]
    pub fn matches_url(&self, url: &str) -> bool {
        matches_any(&self.matches, url)
    }

    /// Checks the configuration against a validation mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the failed rule.
    pub fn validate(&self, mode: ValidationMode) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_config("missing name"));
        }

        if mode == ValidationMode::Strict {
            if !self.matches.iter().any(|p| !p.trim().is_empty()) {
                return Err(Error::invalid_config("missing matches"));
            }
            if self.js.is_empty() && self.css.is_empty() {
                return Err(Error::invalid_config("no js or css items"));
            }
        }

        Ok(())
    }

    /// Finds the JS item referenced by an injection request.
    ///
    /// Matches by file name first, then by inline code.
    #[must_use]
    pub fn find_js(&self, file: Option<&str>, code: Option<&str>) -> Option<&JsItem> {
        self.js.iter().find(|item| match &item.source {
            ItemSource::File(path) => file == Some(path.as_str()),
            ItemSource::Inline(inline) => file.is_none() && code == Some(inline.as_str()),
        })
    }

    /// Identities of every JS item, in declaration order.
    #[must_use]
    pub fn js_identities(&self) -> Vec<String> {
        self.js.iter().map(|item| item_identity(&item.source)).collect()
    }

    /// Every http(s) file referenced by a JS or CSS item.
    #[must_use]
    pub fn http_assets(&self) -> Vec<String> {
        self.js
            .iter()
            .map(|item| &item.source)
            .chain(self.css.iter().map(|item| &item.source))
            .filter_map(|source| match source {
                ItemSource::File(path) if is_http_url(path) => Some(path.clone()),
                _ => None,
            })
            .collect()
    }
}

// ============================================================================
// ValidationMode
// ============================================================================

/// How strictly configurations are validated on add.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidationMode {
    /// A non-empty name is enough.
    #[default]
    Lenient,
    /// Also require a non-empty pattern and at least one JS or CSS item.
    Strict,
}

// ============================================================================
// Source
// ============================================================================

/// Provenance of a configuration's files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Blobs kept in extension storage.
    Storage,
    /// Backed by a directory handle that can be rescanned.
    Fs,
}

// ============================================================================
// Item
// ============================================================================

/// Where an item's content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemSource {
    /// Stored file name, or absolute http(s) URL served from the cache.
    File(String),
    /// Inline source text.
    Inline(String),
}

/// An injectable item with per-item overrides.
///
/// Deserializes from a bare string (file name) or an object with `file`
/// or `code`. When both are present the inline code wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item<O> {
    /// Content location.
    pub source: ItemSource,
    /// Item-level overrides.
    pub options: O,
}

/// A JS item.
pub type JsItem = Item<JsOptions>;

/// A CSS item.
pub type CssItem = Item<CssOptions>;

impl<O: Default> Item<O> {
    /// Creates a file item without overrides.
    #[must_use]
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            source: ItemSource::File(path.into()),
            options: O::default(),
        }
    }

    /// Creates an inline item without overrides.
    #[must_use]
    pub fn inline(code: impl Into<String>) -> Self {
        Self {
            source: ItemSource::Inline(code.into()),
            options: O::default(),
        }
    }

    /// Replaces the item overrides.
    #[must_use]
    pub fn with_options(mut self, options: O) -> Self {
        self.options = options;
        self
    }
}

impl<O> Item<O> {
    /// File name, if this is a file item.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        match &self.source {
            ItemSource::File(path) => Some(path),
            ItemSource::Inline(_) => None,
        }
    }

    /// Inline code, if this is an inline item.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match &self.source {
            ItemSource::Inline(code) => Some(code),
            ItemSource::File(_) => None,
        }
    }
}

/// Wire shape shared by both item kinds.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawItem<O> {
    Bare(String),
    Object {
        #[serde(default)]
        file: Option<String>,
        #[serde(default)]
        code: Option<String>,
        #[serde(flatten)]
        options: O,
    },
}

#[derive(Serialize)]
struct RawItemRef<'a, O> {
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(flatten)]
    options: &'a O,
}

impl<'de, O> Deserialize<'de> for Item<O>
where
    O: Deserialize<'de> + Default,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match RawItem::<O>::deserialize(deserializer)? {
            RawItem::Bare(file) => Ok(Self {
                source: ItemSource::File(file),
                options: O::default(),
            }),
            RawItem::Object {
                file,
                code,
                options,
            } => {
                let source = match (code, file) {
                    (Some(code), _) => ItemSource::Inline(code),
                    (None, Some(file)) => ItemSource::File(file),
                    (None, None) => {
                        return Err(de::Error::custom("item needs a `file` or `code` field"));
                    }
                };
                Ok(Self { source, options })
            }
        }
    }
}

impl<O> Serialize for Item<O>
where
    O: Serialize + Default + PartialEq,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if let (ItemSource::File(file), true) = (&self.source, self.options == O::default()) {
            return serializer.serialize_str(file);
        }

        RawItemRef {
            file: self.file_name(),
            code: self.code(),
            options: &self.options,
        }
        .serialize(serializer)
    }
}

// ============================================================================
// JS Options
// ============================================================================

/// When a registered script runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAt {
    /// Before any page script.
    DocumentStart,
    /// After the DOM is parsed.
    DocumentEnd,
    /// When the page is idle.
    #[default]
    DocumentIdle,
}

impl RunAt {
    /// Normalizes a free-form value; anything unknown is `document_idle`.
    #[must_use]
    pub fn normalize(value: &str) -> Self {
        match value {
            "document_start" => Self::DocumentStart,
            "document_end" => Self::DocumentEnd,
            _ => Self::DocumentIdle,
        }
    }
}

impl<'de> Deserialize<'de> for RunAt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.map(|v| Self::normalize(&v)).unwrap_or_default())
    }
}

/// JavaScript execution world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum World {
    /// Page-visible world.
    #[default]
    #[serde(rename = "MAIN")]
    Main,
    /// Dedicated user-script world.
    #[serde(rename = "USER_SCRIPT")]
    UserScript,
    /// Extension-isolated world.
    #[serde(rename = "ISOLATED")]
    Isolated,
}

/// Partial JS descriptor: item overrides or config-level defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsOptions {
    /// Run timing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<RunAt>,
    /// Execution world.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world: Option<World>,
    /// Inject into every frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_frames: Option<bool>,
    /// Patterns excluded from injection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_matches: Option<Vec<String>>,
}

/// JS options after the three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedJs {
    /// Run timing, `document_idle` unless overridden.
    pub run_at: RunAt,
    /// Execution world, `MAIN` unless overridden.
    pub world: World,
    /// Forwarded only when set.
    pub all_frames: Option<bool>,
    /// Forwarded only when set.
    pub exclude_matches: Option<Vec<String>>,
}

impl JsOptions {
    /// Field-wise overlay: values set on `self` win over `lower`.
    #[must_use]
    pub fn overlay(&self, lower: &Self) -> Self {
        Self {
            run_at: self.run_at.or(lower.run_at),
            world: self.world.or(lower.world),
            all_frames: self.all_frames.or(lower.all_frames),
            exclude_matches: self
                .exclude_matches
                .clone()
                .or_else(|| lower.exclude_matches.clone()),
        }
    }

    /// Merges item overrides over config defaults over built-in defaults.
    #[must_use]
    pub fn resolve(item: &Self, config_default: Option<&Self>) -> ResolvedJs {
        let merged = match config_default {
            Some(defaults) => item.overlay(defaults),
            None => item.clone(),
        };

        ResolvedJs {
            run_at: merged.run_at.unwrap_or_default(),
            world: merged.world.unwrap_or_default(),
            all_frames: merged.all_frames,
            exclude_matches: merged.exclude_matches,
        }
    }
}

// ============================================================================
// CSS Options
// ============================================================================

/// Where a style element is placed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectAt {
    /// Appended to `<head>` (or the document root without a head).
    #[default]
    Head,
    /// First child of `<body>`.
    BodyStart,
    /// Last child of `<body>`.
    BodyEnd,
}

impl<'de> Deserialize<'de> for InjectAt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(match value.as_deref() {
            Some("body_start") => Self::BodyStart,
            Some("body_end") => Self::BodyEnd,
            _ => Self::Head,
        })
    }
}

/// Partial CSS descriptor: item overrides or config-level defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CssOptions {
    /// Placement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inject_at: Option<InjectAt>,
}

impl CssOptions {
    /// Merges item overrides over config defaults over `head`.
    #[must_use]
    pub fn resolve(item: &Self, config_default: Option<&Self>) -> InjectAt {
        item.inject_at
            .or_else(|| config_default.and_then(|d| d.inject_at))
            .unwrap_or_default()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Accepts `"pattern"` or `["a", "b"]`.
fn one_or_many<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(one)) => vec![one],
        Some(OneOrMany::Many(many)) => many,
        None => Vec::new(),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Configuration {
        serde_json::from_str(json).expect("parse config")
    }

    #[test]
    fn test_parse_config_json() {
        let config = parse(
            r#"{
                "name": "demo",
                "description": "Demo site",
                "matches": ["*://example.com/*"],
                "js": ["main.js", {"code": "console.log(1)", "runAt": "document_start"}],
                "css": [{"file": "style.css", "injectAt": "body_end"}],
                "jsDefault": {"world": "USER_SCRIPT"},
                "path": "ignored"
            }"#,
        );

        assert_eq!(config.name, "demo");
        assert_eq!(config.matches, vec!["*://example.com/*"]);
        assert_eq!(config.js[0].source, ItemSource::File("main.js".into()));
        assert_eq!(config.js[1].code(), Some("console.log(1)"));
        assert_eq!(config.js[1].options.run_at, Some(RunAt::DocumentStart));
        assert_eq!(config.css[0].options.inject_at, Some(InjectAt::BodyEnd));
        assert_eq!(config.enabled, None);
    }

    #[test]
    fn test_single_string_matches() {
        let config = parse(r#"{"name": "x", "matches": "https://a.com/*"}"#);
        assert_eq!(config.matches, vec!["https://a.com/*"]);
    }

    #[test]
    fn test_item_without_file_or_code_is_rejected() {
        let result = serde_json::from_str::<Configuration>(r#"{"name": "x", "js": [{}]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_inline_code_wins_over_file() {
        let config = parse(r#"{"name": "x", "css": [{"file": "a.css", "code": "b{}"}]}"#);
        assert_eq!(config.css[0].source, ItemSource::Inline("b{}".into()));
    }

    #[test]
    fn test_unknown_run_at_normalizes_to_idle() {
        let config = parse(r#"{"name": "x", "js": [{"file": "a.js", "runAt": "whenever"}]}"#);
        assert_eq!(config.js[0].options.run_at, Some(RunAt::DocumentIdle));
    }

    #[test]
    fn test_bare_file_serializes_as_string() {
        let config = Configuration::new("x")
            .with_js(JsItem::file("a.js"))
            .with_js(JsItem::inline("1").with_options(JsOptions {
                all_frames: Some(true),
                ..Default::default()
            }));
        let value = serde_json::to_value(&config).expect("serialize");

        assert_eq!(value["js"][0], "a.js");
        assert_eq!(value["js"][1]["code"], "1");
        assert_eq!(value["js"][1]["allFrames"], true);

        let back: Configuration = serde_json::from_value(value).expect("reparse");
        assert_eq!(back, config);
    }

    #[test]
    fn test_js_merge_precedence() {
        let item = JsOptions {
            run_at: Some(RunAt::DocumentEnd),
            ..Default::default()
        };
        let defaults = JsOptions {
            run_at: Some(RunAt::DocumentStart),
            world: Some(World::Isolated),
            all_frames: Some(true),
            exclude_matches: None,
        };

        let resolved = JsOptions::resolve(&item, Some(&defaults));
        assert_eq!(resolved.run_at, RunAt::DocumentEnd);
        assert_eq!(resolved.world, World::Isolated);
        assert_eq!(resolved.all_frames, Some(true));

        let builtin = JsOptions::resolve(&JsOptions::default(), None);
        assert_eq!(builtin.run_at, RunAt::DocumentIdle);
        assert_eq!(builtin.world, World::Main);
        assert_eq!(builtin.all_frames, None);
    }

    #[test]
    fn test_css_merge_precedence() {
        let defaults = CssOptions {
            inject_at: Some(InjectAt::BodyStart),
        };
        assert_eq!(
            CssOptions::resolve(&CssOptions::default(), Some(&defaults)),
            InjectAt::BodyStart
        );
        assert_eq!(
            CssOptions::resolve(
                &CssOptions {
                    inject_at: Some(InjectAt::BodyEnd)
                },
                Some(&defaults)
            ),
            InjectAt::BodyEnd
        );
        assert_eq!(CssOptions::resolve(&CssOptions::default(), None), InjectAt::Head);
    }

    #[test]
    fn test_validate_modes() {
        let named = Configuration::new("demo");
        assert!(named.validate(ValidationMode::Lenient).is_ok());
        assert!(matches!(
            named.validate(ValidationMode::Strict),
            Err(Error::InvalidConfig { .. })
        ));

        let full = named
            .clone()
            .with_match("*://example.com/*")
            .with_css(CssItem::file("a.css"));
        assert!(full.validate(ValidationMode::Strict).is_ok());

        assert!(Configuration::new("  ").validate(ValidationMode::Lenient).is_err());
    }

    #[test]
    fn test_find_js() {
        let config = Configuration::new("x")
            .with_js(JsItem::file("a.js"))
            .with_js(JsItem::inline("go()"));

        assert!(config.find_js(Some("a.js"), None).is_some());
        assert!(config.find_js(None, Some("go()")).is_some());
        assert!(config.find_js(Some("b.js"), None).is_none());
    }

    #[test]
    fn test_http_assets() {
        let config = Configuration::new("x")
            .with_js(JsItem::file("https://cdn.example.com/lib.js"))
            .with_js(JsItem::file("local.js"))
            .with_css(CssItem::file("http://cdn.example.com/a.css"));

        assert_eq!(
            config.http_assets(),
            vec![
                "https://cdn.example.com/lib.js".to_string(),
                "http://cdn.example.com/a.css".to_string()
            ]
        );
    }
}
