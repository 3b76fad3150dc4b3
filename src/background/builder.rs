//! Builder for [`Coordinator`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::cache::CacheFetcher;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::storage::{HandleStore, KeyValueStore, MemoryHandleStore};
use crate::transport::TabMessenger;

use super::coordinator::{Coordinator, CoordinatorParts};
use super::{CoordinatorOptions, TabHost};

// ============================================================================
// CoordinatorBuilder
// ============================================================================

/// Builder for a [`Coordinator`].
///
/// Storage, tab host, messenger and cache are required. Without an engine
/// every JS injection fails with `EngineUnavailable`; without a handle
/// store, directory handles are kept in memory.
#[derive(Default)]
pub struct CoordinatorBuilder {
    storage: Option<Arc<dyn KeyValueStore>>,
    tabs: Option<Arc<dyn TabHost>>,
    messenger: Option<Arc<dyn TabMessenger>>,
    engine: Option<Engine>,
    cache: Option<CacheFetcher>,
    handles: Option<Arc<dyn HandleStore>>,
    options: CoordinatorOptions,
}

impl fmt::Debug for CoordinatorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorBuilder")
            .field("storage", &self.storage.is_some())
            .field("tabs", &self.tabs.is_some())
            .field("messenger", &self.messenger.is_some())
            .field("engine", &self.engine)
            .field("cache", &self.cache.is_some())
            .field("handles", &self.handles.is_some())
            .field("options", &self.options)
            .finish()
    }
}

impl CoordinatorBuilder {
    /// Creates an empty builder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the durable key-value store.
    #[inline]
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sets the tab host.
    #[inline]
    #[must_use]
    pub fn tabs(mut self, tabs: Arc<dyn TabHost>) -> Self {
        self.tabs = Some(tabs);
        self
    }

    /// Sets the background-to-tab messenger.
    #[inline]
    #[must_use]
    pub fn messenger(mut self, messenger: Arc<dyn TabMessenger>) -> Self {
        self.messenger = Some(messenger);
        self
    }

    /// Sets the probed script engine.
    #[inline]
    #[must_use]
    pub fn engine(mut self, engine: Engine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Sets the asset cache.
    #[inline]
    #[must_use]
    pub fn cache(mut self, cache: CacheFetcher) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the directory-handle store.
    #[inline]
    #[must_use]
    pub fn handles(mut self, handles: Arc<dyn HandleStore>) -> Self {
        self.handles = Some(handles);
        self
    }

    /// Sets the options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: CoordinatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the coordinator. Call
    /// [`Coordinator::init`] before handling messages.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first missing collaborator.
    pub fn build(self) -> Result<Coordinator> {
        let storage = self
            .storage
            .ok_or_else(|| Error::config("Storage is required. Use .storage() to set it."))?;
        let tabs = self
            .tabs
            .ok_or_else(|| Error::config("Tab host is required. Use .tabs() to set it."))?;
        let messenger = self
            .messenger
            .ok_or_else(|| Error::config("Messenger is required. Use .messenger() to set it."))?;
        let cache = self
            .cache
            .ok_or_else(|| Error::config("Asset cache is required. Use .cache() to set it."))?;

        let engine = self.engine.unwrap_or_else(|| {
            warn!("No script engine configured, JS injection unavailable");
            Engine::unavailable()
        });
        let handles = self
            .handles
            .unwrap_or_else(|| Arc::new(MemoryHandleStore::new()));

        Ok(Coordinator::from_parts(CoordinatorParts {
            storage,
            tabs,
            messenger,
            engine,
            cache,
            handles,
            options: self.options,
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::background::MemoryTabs;
    use crate::cache::{MemoryBlobStore, MemoryFetch};
    use crate::engine::EngineKind;
    use crate::storage::MemoryStorage;
    use crate::transport::TabRouter;

    fn cache() -> CacheFetcher {
        CacheFetcher::new(Arc::new(MemoryBlobStore::new()), Arc::new(MemoryFetch::new()))
    }

    #[test]
    fn test_build_fails_without_storage() {
        let err = CoordinatorBuilder::new()
            .tabs(Arc::new(MemoryTabs::new()))
            .messenger(Arc::new(TabRouter::new()))
            .cache(cache())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("Storage"));
    }

    #[test]
    fn test_build_fails_without_messenger() {
        let err = CoordinatorBuilder::new()
            .storage(Arc::new(MemoryStorage::new()))
            .tabs(Arc::new(MemoryTabs::new()))
            .cache(cache())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Messenger"));
    }

    #[test]
    fn test_build_defaults_engine() {
        let coordinator = CoordinatorBuilder::new()
            .storage(Arc::new(MemoryStorage::new()))
            .tabs(Arc::new(MemoryTabs::new()))
            .messenger(Arc::new(TabRouter::new()))
            .cache(cache())
            .build()
            .expect("build");
        assert_eq!(coordinator.engine().kind(), EngineKind::Unavailable);
    }
}
