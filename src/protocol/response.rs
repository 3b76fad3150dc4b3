//! Response envelope.

// ============================================================================
// Imports
// ============================================================================

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::identifiers::TabId;

// ============================================================================
// Response
// ============================================================================

/// Answer to a [`Message`](super::Message).
///
/// # Format
///
/// ```json
/// { "success": true, "tabId": 3 }
/// { "success": false, "error": "Invalid config format: missing name" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Whether the request succeeded.
    pub success: bool,

    /// Error message, on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Configurations, for `GET_CONFIGS`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configs: Option<Vec<Configuration>>,

    /// Configuration, for `GET_CONFIG`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Configuration>,

    /// Tab id, for `GET_TAB_ID`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,

    /// Cached text, for `GET_CACHED_CONTENT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Per-URL results, for `CACHE_ASSETS`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<Vec<AssetReport>>,
}

impl Response {
    /// A bare success.
    #[inline]
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// A failure carrying `error`'s message.
    #[inline]
    #[must_use]
    pub fn failure(error: impl Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    /// Attaches configurations.
    #[must_use]
    pub fn with_configs(mut self, configs: Vec<Configuration>) -> Self {
        self.configs = Some(configs);
        self
    }

    /// Attaches a configuration.
    #[must_use]
    pub fn with_config(mut self, config: Option<Configuration>) -> Self {
        self.config = config;
        self
    }

    /// Attaches a tab id.
    #[must_use]
    pub fn with_tab_id(mut self, tab_id: TabId) -> Self {
        self.tab_id = Some(tab_id);
        self
    }

    /// Attaches cached text.
    #[must_use]
    pub fn with_content(mut self, content: String) -> Self {
        self.content = Some(content);
        self
    }

    /// Attaches a caching report.
    #[must_use]
    pub fn with_report(mut self, report: Vec<AssetReport>) -> Self {
        self.report = Some(report);
        self
    }

    /// Converts a failure into [`Error::Protocol`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] with the remote message if `success` is
    /// false.
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(Error::protocol(
                self.error.unwrap_or_else(|| "Unknown error".to_string()),
            ))
        }
    }
}

// ============================================================================
// AssetReport
// ============================================================================

/// Outcome of caching one remote asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetReport {
    /// Asset URL.
    pub url: String,
    /// Whether it is now cached.
    pub success: bool,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AssetReport {
    /// A cached asset.
    #[must_use]
    pub fn cached(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            success: true,
            error: None,
        }
    }

    /// A failed asset.
    #[must_use]
    pub fn failed(url: impl Into<String>, error: impl Display) -> Self {
        Self {
            url: url.into(),
            success: false,
            error: Some(error.to_string()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_failure_shape() {
        let response = Response::failure(Error::invalid_config("missing name"));
        assert_eq!(
            serde_json::to_value(&response).expect("serialize"),
            json!({ "success": false, "error": "Invalid config format: missing name" })
        );
    }

    #[test]
    fn test_into_result() {
        assert!(Response::ok().into_result().is_ok());

        let err = Response::failure("Tab not found: 9").into_result().unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert!(err.to_string().contains("Tab not found: 9"));
    }

    #[test]
    fn test_tab_id_field() {
        let response = Response::ok().with_tab_id(TabId::new(3).expect("tab"));
        assert_eq!(
            serde_json::to_value(&response).expect("serialize"),
            json!({ "success": true, "tabId": 3 })
        );
    }
}
