//! Browser-style URL match patterns.
//!
//! Grammar: `scheme://host/path` where `scheme` is `*` or a literal, and
//! `host`/`path` may contain `*` (any run, including empty) and `?`
//! (exactly one character). Everything else matches literally. Matching is
//! anchored against the whole URL.
//!
//! [`match_pattern`] and [`matches_any`] keep compiled patterns in a
//! process-wide table, so a pattern is translated once no matter how many
//! tabs or lookups test it.
//!
//! ```ignore
//! assert!(match_pattern("*://*.example.com/*", "https://foo.example.com/bar"));
//! assert!(!match_pattern("https://example.com/*", "http://example.com/x"));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::LazyLock;

use parking_lot::RwLock;
use regex::Regex;
use rustc_hash::FxHashMap;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Separator between scheme and the rest of a pattern.
const SCHEME_SEPARATOR: &str = "://";

/// Regex fragment matched by a `*` scheme.
const ANY_SCHEME: &str = "[^:/]+";

/// Compiled pattern table capacity; the table is emptied when full.
pub const PATTERN_CACHE_LIMIT: usize = 1024;

/// Compiled patterns by source text. `None` marks a malformed pattern.
static COMPILED: LazyLock<RwLock<FxHashMap<String, Option<MatchPattern>>>> =
    LazyLock::new(|| RwLock::new(FxHashMap::default()));

// ============================================================================
// MatchPattern
// ============================================================================

/// A compiled match pattern.
#[derive(Debug, Clone)]
pub struct MatchPattern {
    /// Source text.
    pattern: String,
    /// Anchored regex.
    regex: Regex,
}

impl MatchPattern {
    /// Compiles a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if the pattern lacks `://` or the
    /// translated regex does not compile.
    pub fn parse(pattern: &str) -> Result<Self> {
        let (scheme, rest) = pattern
            .split_once(SCHEME_SEPARATOR)
            .ok_or_else(|| Error::invalid_pattern(pattern, "missing '://'"))?;

        let scheme = if scheme == "*" {
            ANY_SCHEME.to_string()
        } else {
            regex::escape(scheme)
        };

        let source = format!("^{scheme}{}{}$", regex::escape(SCHEME_SEPARATOR), glob(rest));
        let regex =
            Regex::new(&source).map_err(|e| Error::invalid_pattern(pattern, e.to_string()))?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Returns the source text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Tests a URL as given and in its normalized form.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        if self.regex.is_match(url) {
            return true;
        }
        normalize_url(url).is_some_and(|normalized| self.regex.is_match(&normalized))
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Tests a single pattern. Malformed patterns never match.
#[must_use]
pub fn match_pattern(pattern: &str, url: &str) -> bool {
    compiled(pattern).is_some_and(|compiled| compiled.matches(url))
}

/// Returns `true` if any pattern matches.
#[must_use]
pub fn matches_any(patterns: &[String], url: &str) -> bool {
    patterns.iter().any(|pattern| match_pattern(pattern, url))
}

/// Looks up or compiles `pattern`.
fn compiled(pattern: &str) -> Option<MatchPattern> {
    if let Some(entry) = COMPILED.read().get(pattern) {
        return entry.clone();
    }

    let entry = match MatchPattern::parse(pattern) {
        Ok(compiled) => Some(compiled),
        Err(e) => {
            debug!(pattern = %pattern, error = %e, "Skipping invalid match pattern");
            None
        }
    };

    let mut table = COMPILED.write();
    if table.len() >= PATTERN_CACHE_LIMIT {
        table.clear();
    }
    table.insert(pattern.to_string(), entry.clone());
    entry
}

/// Number of patterns in the compiled table.
#[must_use]
pub fn cached_patterns() -> usize {
    COMPILED.read().len()
}

/// Serialized form of a parsed URL, if it parses and differs.
fn normalize_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let normalized = parsed.to_string();
    (normalized != url).then_some(normalized)
}

/// Translates `*`/`?` wildcards, escaping everything else.
fn glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    let mut buf = [0u8; 4];

    for ch in text.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            _ => out.push_str(&regex::escape(ch.encode_utf8(&mut buf))),
        }
    }

    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_wildcard_subdomain() {
        assert!(match_pattern(
            "*://*.example.com/*",
            "https://foo.example.com/bar"
        ));
    }

    #[test]
    fn test_scheme_mismatch() {
        assert!(!match_pattern("https://example.com/*", "http://example.com/x"));
    }

    #[test]
    fn test_question_mark_is_single_char() {
        assert!(!match_pattern("*://x/?", "https://x/ab"));
        assert!(match_pattern("*://x/?", "https://x/a"));
    }

    #[test]
    fn test_missing_separator_never_matches() {
        assert!(!match_pattern("<all_urls>", "https://example.com/"));
        assert!(MatchPattern::parse("example.com/*").is_err());
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        assert!(match_pattern("https://a.com/p+q", "https://a.com/p+q"));
        assert!(!match_pattern("https://a.com/*", "https://aXcom/x"));
    }

    #[test]
    fn test_normalized_url_matches() {
        assert!(match_pattern("https://example.com/*", "https://example.com"));
        assert!(match_pattern("*://example.com/*", "https://EXAMPLE.com/page"));
    }

    #[test]
    fn test_matches_any() {
        let patterns = vec![
            "https://a.com/*".to_string(),
            "https://b.com/*".to_string(),
        ];
        assert!(matches_any(&patterns, "https://b.com/x"));
        assert!(!matches_any(&patterns, "https://c.com/x"));
        assert!(!matches_any(&[], "https://a.com/"));
    }

    #[test]
    fn test_compiled_pattern_is_reused() {
        let pattern = "https://reuse.example/*";
        assert!(match_pattern(pattern, "https://reuse.example/a"));
        let first = compiled(pattern).expect("compiled");
        let second = compiled(pattern).expect("compiled");

        assert_eq!(first.as_str(), pattern);
        assert!(COMPILED.read().contains_key(pattern));
        assert!(second.matches("https://reuse.example/b"));
        assert!(cached_patterns() <= PATTERN_CACHE_LIMIT);
    }

    #[test]
    fn test_malformed_pattern_is_remembered() {
        assert!(!match_pattern("no-separator-cached", "https://a.com/"));
        assert!(matches!(COMPILED.read().get("no-separator-cached"), Some(None)));
        assert!(!match_pattern("no-separator-cached", "https://a.com/"));
    }

    proptest! {
        #[test]
        fn prop_literal_pattern_matches_itself(host in "[a-z]{1,12}", path in "[a-z0-9/._-]{0,20}") {
            let url = format!("https://{host}.com/{path}");
            prop_assert!(match_pattern(&url, &url));
        }
    }
}
