//! Tab host interface and an in-memory tab table.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::config::matches_any;
use crate::error::{Error, Result};
use crate::identifiers::TabId;

// ============================================================================
// Types
// ============================================================================

/// A browser tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    /// Tab id.
    pub id: TabId,
    /// Current URL.
    pub url: String,
}

/// Callback run when a content script is loaded into a tab.
pub type ContentScriptLoader = Box<dyn Fn(TabId) + Send + Sync>;

/// Browser tab facilities used by the background.
#[async_trait]
pub trait TabHost: Send + Sync {
    /// Looks up a tab.
    async fn get(&self, tab: TabId) -> Result<Option<TabInfo>>;

    /// Tabs whose URL matches any of `patterns`.
    async fn query(&self, patterns: &[String]) -> Result<Vec<TabInfo>>;

    /// Active tab of the current window.
    async fn active_tab(&self) -> Result<Option<TabInfo>>;

    /// Loads the content script into a tab.
    async fn load_content_script(&self, tab: TabId) -> Result<()>;
}

// ============================================================================
// MemoryTabs
// ============================================================================

/// Tab table held in memory. The most recently opened tab is active.
#[derive(Default)]
pub struct MemoryTabs {
    tabs: RwLock<Vec<TabInfo>>,
    active: RwLock<Option<TabId>>,
    next_id: AtomicU32,
    loader: Option<ContentScriptLoader>,
    loads: Mutex<Vec<TabId>>,
}

impl std::fmt::Debug for MemoryTabs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTabs")
            .field("tabs", &self.tabs.read().len())
            .finish_non_exhaustive()
    }
}

impl MemoryTabs {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `loader` whenever a content script is loaded into a tab.
    #[must_use]
    pub fn with_loader(mut self, loader: impl Fn(TabId) + Send + Sync + 'static) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    /// Opens a tab and makes it active.
    pub fn open(&self, url: impl Into<String>) -> TabId {
        let id = loop {
            let raw = self.next_id.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
            if let Some(id) = TabId::new(raw) {
                break id;
            }
        };
        self.tabs.write().push(TabInfo {
            id,
            url: url.into(),
        });
        *self.active.write() = Some(id);
        id
    }

    /// Changes a tab's URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the tab does not exist.
    pub fn navigate(&self, tab: TabId, url: impl Into<String>) -> Result<()> {
        let mut tabs = self.tabs.write();
        let entry = tabs
            .iter_mut()
            .find(|t| t.id == tab)
            .ok_or_else(|| Error::not_found("Tab", tab.to_string()))?;
        entry.url = url.into();
        Ok(())
    }

    /// Closes a tab.
    pub fn close(&self, tab: TabId) {
        self.tabs.write().retain(|t| t.id != tab);
        let mut active = self.active.write();
        if *active == Some(tab) {
            *active = None;
        }
    }

    /// Makes a tab active.
    pub fn activate(&self, tab: TabId) {
        *self.active.write() = Some(tab);
    }

    /// Tabs that had the content script loaded, in order.
    #[must_use]
    pub fn content_script_loads(&self) -> Vec<TabId> {
        self.loads.lock().clone()
    }
}

#[async_trait]
impl TabHost for MemoryTabs {
    async fn get(&self, tab: TabId) -> Result<Option<TabInfo>> {
        Ok(self.tabs.read().iter().find(|t| t.id == tab).cloned())
    }

    async fn query(&self, patterns: &[String]) -> Result<Vec<TabInfo>> {
        Ok(self
            .tabs
            .read()
            .iter()
            .filter(|t| matches_any(patterns, &t.url))
            .cloned()
            .collect())
    }

    async fn active_tab(&self) -> Result<Option<TabInfo>> {
        let active = *self.active.read();
        match active {
            Some(tab) => self.get(tab).await,
            None => Ok(None),
        }
    }

    async fn load_content_script(&self, tab: TabId) -> Result<()> {
        if self.get(tab).await?.is_none() {
            return Err(Error::not_found("Tab", tab.to_string()));
        }
        self.loads.lock().push(tab);
        if let Some(loader) = &self.loader {
            loader(tab);
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
