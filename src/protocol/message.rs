//! Tagged protocol messages.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::config::{Configuration, RunAt};
use crate::identifiers::{ConfigId, TabId};

// ============================================================================
// Message
// ============================================================================

/// A protocol message.
///
/// # Format
///
/// ```json
/// { "type": "TOGGLE_CONFIG", "configId": "demo", "enabled": false }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Message {
    /// List every configuration.
    GetConfigs,

    /// Add or overwrite a configuration.
    AddConfig {
        /// Store key.
        config_id: ConfigId,
        /// The configuration.
        config: Configuration,
    },

    /// Enable or disable a configuration.
    ToggleConfig {
        /// Store key.
        config_id: ConfigId,
        /// New state.
        enabled: bool,
    },

    /// Delete a configuration and everything it owns.
    DeleteConfig {
        /// Store key.
        config_id: ConfigId,
    },

    /// Reload from storage and rebuild every registration.
    ReloadConfigs,

    /// Re-read a filesystem-backed configuration from its directory.
    RescanConfig {
        /// Store key.
        config_id: ConfigId,
    },

    /// Fetch every remote asset of a configuration into the cache.
    CacheAssets {
        /// Store key.
        config_id: ConfigId,
    },

    /// First enabled configuration matching a URL or the sender's tab.
    GetConfig {
        /// URL to match; the sender's tab when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },

    /// The sender's tab id.
    GetTabId,

    /// Inject a JS item of a configuration.
    InjectJs {
        /// Owning configuration.
        config_id: ConfigId,
        /// File name or URL of the item.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        js_file_name: Option<String>,
        /// Inline code of the item.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        js_code: Option<String>,
        /// Run timing.
        #[serde(default)]
        run_at: RunAt,
        /// Target tab; the sender's tab when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
    },

    /// Inject a cached jQuery build.
    InjectJquery {
        /// Owning configuration.
        config_id: ConfigId,
        /// jQuery version, e.g. `3.7.1`.
        version: String,
        /// Run timing.
        #[serde(default)]
        run_at: RunAt,
        /// Target tab; the sender's tab when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
    },

    /// Read a cached remote asset.
    GetCachedContent {
        /// Owning configuration.
        config_id: ConfigId,
        /// Asset URL.
        url: String,
    },

    /// Inject a configuration into the receiving document.
    Inject {
        /// The configuration.
        config: Configuration,
    },

    /// Remove everything a configuration injected into the document.
    Cleanup {
        /// Store key.
        config_id: ConfigId,
    },
}

impl Message {
    /// Wire name of the message type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::GetConfigs => "GET_CONFIGS",
            Self::AddConfig { .. } => "ADD_CONFIG",
            Self::ToggleConfig { .. } => "TOGGLE_CONFIG",
            Self::DeleteConfig { .. } => "DELETE_CONFIG",
            Self::ReloadConfigs => "RELOAD_CONFIGS",
            Self::RescanConfig { .. } => "RESCAN_CONFIG",
            Self::CacheAssets { .. } => "CACHE_ASSETS",
            Self::GetConfig { .. } => "GET_CONFIG",
            Self::GetTabId => "GET_TAB_ID",
            Self::InjectJs { .. } => "INJECT_JS",
            Self::InjectJquery { .. } => "INJECT_JQUERY",
            Self::GetCachedContent { .. } => "GET_CACHED_CONTENT",
            Self::Inject { .. } => "INJECT",
            Self::Cleanup { .. } => "CLEANUP",
        }
    }
}

// ============================================================================
// Sender
// ============================================================================

/// Who sent a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sender {
    /// Sending tab, for content scripts.
    pub tab_id: Option<TabId>,
    /// Document URL of the sending tab.
    pub url: Option<String>,
}

impl Sender {
    /// A content script in `tab`.
    #[must_use]
    pub fn tab(tab_id: TabId, url: impl Into<String>) -> Self {
        Self {
            tab_id: Some(tab_id),
            url: Some(url.into()),
        }
    }

    /// An extension page such as the dashboard.
    #[must_use]
    pub fn extension() -> Self {
        Self::default()
    }
}

// ============================================================================
// Tests
// ============================================================================
