//! Background coordinator.
//!
//! Owns the configuration store and the registration reconciler, and
//! answers every message the dashboard and content scripts send.
//!
//! # Locking
//!
//! The store sits behind an async mutex. It is never held across a
//! message to a tab: the tab's content script calls back into
//! [`Coordinator::handle`] while answering.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheFetcher, Progress, is_http_url};
use crate::config::{ConfigStore, Configuration, Item, JsItem, RunAt, Source};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::identifiers::{ConfigId, TabId};
use crate::protocol::{AssetReport, Message, Response, Sender};
use crate::registry::{DesiredScript, ReconcileReport, Reconciler};
use crate::source::{self, LoadedDirectory};
use crate::storage::{
    HandleStore, KeyValueStore, StorageKeys, decode_data_url, load_file_map, remove_file_map,
    save_file_map,
};
use crate::transport::TabMessenger;

use super::{CoordinatorBuilder, CoordinatorOptions, TabHost};

// ============================================================================
// Constants
// ============================================================================

/// jQuery builds are cached from this CDN.
const JQUERY_CDN: &str = "https://code.jquery.com";

/// URL of a jQuery build.
#[must_use]
pub fn jquery_url(version: &str) -> String {
    format!("{JQUERY_CDN}/jquery-{version}.min.js")
}

// ============================================================================
// TabStatus
// ============================================================================

/// Loading state reported by a tab update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabStatus {
    /// Navigation in progress.
    Loading,
    /// Document finished loading.
    Complete,
}

// ============================================================================
// Coordinator
// ============================================================================

/// Collaborators handed over by [`CoordinatorBuilder`].
pub(crate) struct CoordinatorParts {
    pub storage: Arc<dyn KeyValueStore>,
    pub tabs: Arc<dyn TabHost>,
    pub messenger: Arc<dyn TabMessenger>,
    pub engine: Engine,
    pub cache: CacheFetcher,
    pub handles: Arc<dyn HandleStore>,
    pub options: CoordinatorOptions,
}

/// The background context.
pub struct Coordinator {
    store: Mutex<ConfigStore>,
    reconciler: Option<Reconciler>,
    engine: Engine,
    storage: Arc<dyn KeyValueStore>,
    keys: StorageKeys,
    cache: CacheFetcher,
    handles: Arc<dyn HandleStore>,
    tabs: Arc<dyn TabHost>,
    messenger: Arc<dyn TabMessenger>,
    options: CoordinatorOptions,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("engine", &self.engine.kind())
            .field("namespace", &self.keys.namespace())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Coordinator - Construction
// ============================================================================

impl Coordinator {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    pub(crate) fn from_parts(parts: CoordinatorParts) -> Self {
        let keys = parts.options.keys();
        let store = ConfigStore::new(
            Arc::clone(&parts.storage),
            keys.clone(),
            parts.options.validation(),
        );
        let reconciler = parts.engine.registry().map(Reconciler::new);

        Self {
            store: Mutex::new(store),
            reconciler,
            engine: parts.engine,
            storage: parts.storage,
            keys,
            cache: parts.cache,
            handles: parts.handles,
            tabs: parts.tabs,
            messenger: parts.messenger,
            options: parts.options,
        }
    }

    /// Loads persisted configurations.
    pub async fn init(&self) {
        self.store.lock().await.load_all().await;
        info!(engine = %self.engine.kind(), "Background initialized");
    }
}

// ============================================================================
// Coordinator - Accessors
// ============================================================================

impl Coordinator {
    /// The probed engine.
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The reconciler, for register-based engines.
    #[inline]
    #[must_use]
    pub fn reconciler(&self) -> Option<&Reconciler> {
        self.reconciler.as_ref()
    }

    /// Options in effect.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    /// Every configuration in insertion order.
    pub async fn configs(&self) -> Vec<Configuration> {
        self.store.lock().await.get_all()
    }

    /// Looks up one configuration.
    pub async fn config(&self, id: &ConfigId) -> Option<Configuration> {
        self.store.lock().await.get(id).cloned()
    }
}

// ============================================================================
// Coordinator - Message Handling
// ============================================================================

impl Coordinator {
    /// Answers a message. Errors become failure responses.
    pub async fn handle(&self, message: Message, sender: &Sender) -> Response {
        let kind = message.kind();
        debug!(kind, tab_id = ?sender.tab_id, "Message received");

        match self.dispatch(message, sender).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_not_found() || e.is_transport_error() {
                    debug!(kind, error = %e, "Message failed");
                } else {
                    warn!(kind, error = %e, "Message failed");
                }
                Response::failure(e)
            }
        }
    }

    async fn dispatch(&self, message: Message, sender: &Sender) -> Result<Response> {
        match message {
            Message::GetConfigs => Ok(Response::ok().with_configs(self.configs().await)),

            Message::AddConfig { config_id, config } => {
                self.add_config(config_id, config).await?;
                Ok(Response::ok())
            }

            Message::ToggleConfig { config_id, enabled } => {
                self.toggle_config(&config_id, enabled).await?;
                Ok(Response::ok())
            }

            Message::DeleteConfig { config_id } => {
                self.delete_config(&config_id).await?;
                Ok(Response::ok())
            }

            Message::ReloadConfigs => {
                self.reload_configs().await?;
                Ok(Response::ok())
            }

            Message::RescanConfig { config_id } => {
                self.rescan_config(&config_id).await?;
                Ok(Response::ok())
            }

            Message::CacheAssets { config_id } => {
                let report = self.cache_assets(&config_id, |_, _| {}).await?;
                Ok(Response::ok().with_report(report))
            }

            Message::GetConfig { url } => {
                let config = self.get_config(url.as_deref(), sender.tab_id).await?;
                Ok(Response::ok().with_config(config))
            }

            Message::GetTabId => Ok(Response::ok().with_tab_id(self.tab_id_for(sender).await?)),

            Message::InjectJs {
                config_id,
                js_file_name,
                js_code,
                run_at,
                tab_id,
            } => {
                self.inject_js(
                    &config_id,
                    js_file_name.as_deref(),
                    js_code.as_deref(),
                    run_at,
                    tab_id.or(sender.tab_id),
                )
                .await?;
                Ok(Response::ok())
            }

            Message::InjectJquery {
                config_id,
                version,
                run_at,
                tab_id,
            } => {
                self.inject_jquery(&config_id, &version, run_at, tab_id.or(sender.tab_id))
                    .await?;
                Ok(Response::ok())
            }

            Message::GetCachedContent { config_id, url } => {
                let content = self
                    .cache
                    .get_cached_content(&config_id, &url)
                    .await?
                    .ok_or_else(|| Error::not_found("Cached asset", url))?;
                Ok(Response::ok().with_content(content))
            }

            message @ (Message::Inject { .. } | Message::Cleanup { .. }) => Err(
                Error::protocol(format!("{} is not handled by the background", message.kind())),
            ),
        }
    }
}

// ============================================================================
// Coordinator - Commands
// ============================================================================

impl Coordinator {
    /// Adds or overwrites a configuration and injects it into open tabs.
    ///
    /// An overwritten configuration is retired first: its registrations
    /// are removed and its tabs cleaned up.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if validation fails
    /// - [`Error::Storage`] if the write fails
    pub async fn add_config(&self, id: ConfigId, config: Configuration) -> Result<Configuration> {
        let (previous, stored) = {
            let mut store = self.store.lock().await;
            let previous = store.get(&id).cloned();
            (previous, store.add(id.clone(), config).await?)
        };

        if let Some(previous) = previous {
            if let Err(e) = self.unregister(&id, Some(&previous)).await {
                warn!(config_id = %id, error = %e, "Failed to unregister replaced configuration");
            }
            self.cleanup_tabs(&id, &previous).await;
        }

        self.inject_into_matching_tabs(&id).await;
        Ok(stored)
    }

    /// Enables or disables a configuration.
    ///
    /// Disabling removes its registrations and sends CLEANUP to every
    /// matching tab. Enabling injects it into matching tabs. An unknown id
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the write fails, or the engine error
    /// if unregistering fails.
    pub async fn toggle_config(&self, id: &ConfigId, enabled: bool) -> Result<()> {
        let config = {
            let mut store = self.store.lock().await;
            if !store.toggle(id, enabled).await? {
                debug!(config_id = %id, "Toggle for unknown configuration ignored");
                return Ok(());
            }
            store.get(id).cloned()
        };

        if enabled {
            self.inject_into_matching_tabs(id).await;
            return Ok(());
        }

        let unregistered = self.unregister(id, config.as_ref()).await;
        if let Some(config) = &config {
            self.cleanup_tabs(id, config).await;
        }
        unregistered
    }

    /// Deletes a configuration and everything it owns: registrations,
    /// injected DOM, the file map, cached assets and the directory handle.
    ///
    /// # Errors
    ///
    /// Returns the engine error if unregistering fails (nothing is deleted
    /// then), or [`Error::Storage`] if the store write fails.
    pub async fn delete_config(&self, id: &ConfigId) -> Result<()> {
        let config = self.config(id).await;
        self.unregister(id, config.as_ref()).await?;

        let removed = self.store.lock().await.delete(id).await?;

        if let Err(e) = remove_file_map(self.storage.as_ref(), &self.keys, id).await {
            warn!(config_id = %id, error = %e, "Failed to remove file map");
        }
        if let Err(e) = self.cache.clear_config_cache(id).await {
            warn!(config_id = %id, error = %e, "Failed to clear asset cache");
        }
        if let Err(e) = self.handles.delete(id).await {
            warn!(config_id = %id, error = %e, "Failed to remove directory handle");
        }
        if let Some(config) = &removed {
            self.cleanup_tabs(id, config).await;
        }

        info!(config_id = %id, found = removed.is_some(), "Configuration deleted");
        Ok(())
    }

    /// Reloads every configuration from storage and rebuilds all
    /// registrations from scratch, then injects enabled configurations
    /// into matching tabs.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the unregister phase fails.
    pub async fn reload_configs(&self) -> Result<ReconcileReport> {
        let (previous, configs) = {
            let mut store = self.store.lock().await;
            let previous = store.get_all();
            store.load_all().await;
            (previous, store.get_all())
        };

        let report = match &self.reconciler {
            Some(reconciler) => {
                let mut desired = Vec::new();
                for config in configs.iter().filter(|c| c.is_enabled()) {
                    desired.extend(self.desired_scripts(config).await);
                }
                reconciler.reconcile_all(&previous, desired).await?
            }
            None => ReconcileReport::default(),
        };

        for config in configs.iter().filter(|c| c.is_enabled()) {
            if let Some(id) = &config.id {
                self.inject_into_matching_tabs(id).await;
            }
        }

        info!(
            configs = configs.len(),
            registered = report.registered,
            "Configurations reloaded"
        );
        Ok(report)
    }

    /// Re-reads a filesystem-backed configuration from its recorded
    /// directory and re-adds it.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no directory handle is recorded
    /// - any error from loading or adding the configuration
    pub async fn rescan_config(&self, id: &ConfigId) -> Result<Configuration> {
        let handle = self
            .handles
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("Directory handle", id.as_str()))?;

        debug!(config_id = %id, path = %handle.path.display(), "Rescanning directory");
        let loaded = source::load_directory(&handle.path).await?;
        self.import_loaded(id.clone(), loaded, Source::Fs).await
    }

    /// Imports a configuration directory under an id derived from its
    /// name.
    ///
    /// # Errors
    ///
    /// Returns any error from loading, validating or persisting.
    pub async fn import_directory(&self, path: &Path, source: Source) -> Result<ConfigId> {
        let loaded = source::load_directory(path).await?;
        let id = ConfigId::from_name(&loaded.config.name);
        self.import_loaded(id.clone(), loaded, source).await?;
        Ok(id)
    }

    async fn import_loaded(
        &self,
        id: ConfigId,
        loaded: LoadedDirectory,
        source: Source,
    ) -> Result<Configuration> {
        let LoadedDirectory {
            mut config,
            files,
            handle,
        } = loaded;
        config.source = Some(source);
        config.validate(self.options.validation())?;

        save_file_map(self.storage.as_ref(), &self.keys, &id, &files).await?;
        let stored = self.add_config(id.clone(), config).await?;

        if source == Source::Fs {
            self.handles.save(&id, handle).await?;
        }

        let report = self.cache_assets(&id, |_, _| {}).await?;
        let failed = report.iter().filter(|r| !r.success).count();
        if failed > 0 {
            warn!(config_id = %id, failed, "Some assets could not be cached");
        }

        info!(config_id = %id, files = files.len(), "Configuration imported");
        Ok(stored)
    }

    /// Caches every remote asset of a configuration.
    ///
    /// Individual failures are reported per URL, not propagated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown configuration.
    pub async fn cache_assets<F>(&self, id: &ConfigId, mut on_progress: F) -> Result<Vec<AssetReport>>
    where
        F: FnMut(&str, Progress) + Send,
    {
        let config = self
            .config(id)
            .await
            .ok_or_else(|| Error::not_found("Configuration", id.as_str()))?;

        let mut report = Vec::new();
        for url in config.http_assets() {
            let result = self
                .cache
                .cache_url(id, &url, |progress| on_progress(&url, progress))
                .await;
            report.push(match result {
                Ok(_) => AssetReport::cached(url),
                Err(e) => {
                    warn!(config_id = %id, url = %url, error = %e, "Asset caching failed");
                    AssetReport::failed(url, e)
                }
            });
        }
        Ok(report)
    }
}

// ============================================================================
// Coordinator - Queries
// ============================================================================

impl Coordinator {
    /// First enabled configuration matching `url`, or the tab's URL when
    /// no URL is given.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] with neither a URL nor a tab.
    pub async fn get_config(
        &self,
        url: Option<&str>,
        tab: Option<TabId>,
    ) -> Result<Option<Configuration>> {
        let store = self.store.lock().await;
        match (url, tab) {
            (Some(url), _) => Ok(store.match_for_url(url).cloned()),
            (None, Some(tab)) => Ok(store.match_for_tab(self.tabs.as_ref(), tab).await?.cloned()),
            (None, None) => Err(Error::invalid_argument("No tab ID found")),
        }
    }

    /// The sender's tab, falling back to the active tab.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when neither is known.
    pub async fn tab_id_for(&self, sender: &Sender) -> Result<TabId> {
        if let Some(tab) = sender.tab_id {
            return Ok(tab);
        }
        self.tabs
            .active_tab()
            .await?
            .map(|tab| tab.id)
            .ok_or_else(|| Error::invalid_argument("Could not determine tab ID"))
    }
}

// ============================================================================
// Coordinator - Injection
// ============================================================================

impl Coordinator {
    /// Injects one JS item into a tab.
    ///
    /// Code comes from `code`, else from the asset cache for http(s)
    /// files, else from the file map. Register-based engines register the
    /// item for the configuration's patterns; the others run it once in
    /// the tab.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] without a tab or without code and file
    /// - [`Error::NotFound`] if the file or cached asset is missing
    /// - [`Error::RegistrationFailure`] if the engine rejects the script
    /// - [`Error::EngineUnavailable`] if no engine is usable
    pub async fn inject_js(
        &self,
        id: &ConfigId,
        file: Option<&str>,
        code: Option<&str>,
        run_at: RunAt,
        tab: Option<TabId>,
    ) -> Result<()> {
        let tab = tab.ok_or_else(|| Error::invalid_argument("Tab ID is required for JS injection"))?;

        let (item, source) = match (code, file) {
            (Some(code), Some(file)) => (Item::file(file), code.to_string()),
            (Some(code), None) => (Item::inline(code), code.to_string()),
            (None, Some(file)) => (Item::file(file), self.resolve_js_file(id, file).await?),
            (None, None) => {
                return Err(Error::invalid_argument("jsFileName or jsCode is required"));
            }
        };

        self.execute_js(id, item, source, run_at, tab).await
    }

    /// Injects a cached jQuery build as item `jquery-<version>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if that version is not cached, or any
    /// [`inject_js`](Self::inject_js) error.
    pub async fn inject_jquery(
        &self,
        id: &ConfigId,
        version: &str,
        run_at: RunAt,
        tab: Option<TabId>,
    ) -> Result<()> {
        let tab = tab.ok_or_else(|| Error::invalid_argument("Tab ID is required for JS injection"))?;
        let url = jquery_url(version);
        let code = self
            .cache
            .get_cached_content(id, &url)
            .await?
            .ok_or_else(|| Error::not_found("Cached asset", url))?;

        self.execute_js(id, Item::file(format!("jquery-{version}")), code, run_at, tab)
            .await
    }

    /// Reacts to a tab update: once a document is complete, the matching
    /// configuration is sent to the tab. Returns whether one was sent.
    ///
    /// # Errors
    ///
    /// Returns the tab host error if the tab lookup fails.
    pub async fn on_tab_updated(
        &self,
        tab: TabId,
        status: TabStatus,
        url: Option<&str>,
    ) -> Result<bool> {
        if status != TabStatus::Complete || url.is_none() {
            return Ok(false);
        }

        let config = {
            let store = self.store.lock().await;
            store.match_for_tab(self.tabs.as_ref(), tab).await?.cloned()
        };
        let Some(config) = config else {
            return Ok(false);
        };

        if let Err(e) = self.send_inject_to_tab(tab, config).await {
            debug!(tab_id = %tab, error = %e, "INJECT not delivered");
            return Ok(false);
        }
        Ok(true)
    }

    async fn execute_js(
        &self,
        id: &ConfigId,
        item: JsItem,
        code: String,
        run_at: RunAt,
        tab: TabId,
    ) -> Result<()> {
        if let Some(reconciler) = &self.reconciler {
            let Some(config) = self.config(id).await else {
                debug!(config_id = %id, "Configuration gone, JS injection skipped");
                return Ok(());
            };
            let item = config
                .find_js(item.file_name(), item.code())
                .cloned()
                .unwrap_or(item);
            reconciler.register(&config, &item, code, run_at).await?;
            return Ok(());
        }

        self.engine.run(tab, &code, run_at).await.inspect_err(|e| {
            error!(config_id = %id, tab_id = %tab, error = %e, "JS injection failed");
        })
    }

    async fn resolve_js_file(&self, id: &ConfigId, file: &str) -> Result<String> {
        if is_http_url(file) {
            return self
                .cache
                .get_cached_content(id, file)
                .await?
                .ok_or_else(|| Error::not_found("Cached asset", file));
        }

        let files = load_file_map(self.storage.as_ref(), &self.keys, id).await?;
        let data_url = files
            .get(file)
            .ok_or_else(|| Error::not_found("JS file", file))?;
        Ok(String::from_utf8_lossy(&decode_data_url(data_url)?).into_owned())
    }

    async fn desired_scripts(&self, config: &Configuration) -> Vec<DesiredScript> {
        let Some(id) = &config.id else {
            return Vec::new();
        };

        let mut desired = Vec::new();
        for item in &config.js {
            let code = match (item.code(), item.file_name()) {
                (Some(code), _) => Ok(code.to_string()),
                (None, Some(file)) => self.resolve_js_file(id, file).await,
                (None, None) => continue,
            };
            match code {
                Ok(code) => desired.push(DesiredScript {
                    config: config.clone(),
                    item: item.clone(),
                    code,
                }),
                Err(e) => warn!(config_id = %id, error = %e, "JS item skipped on reload"),
            }
        }
        desired
    }

    async fn unregister(&self, id: &ConfigId, config: Option<&Configuration>) -> Result<()> {
        if let Some(reconciler) = &self.reconciler {
            reconciler.unregister_for_config(id, config).await?;
        }
        Ok(())
    }
}

// ============================================================================
// Coordinator - Tab Messaging
// ============================================================================

impl Coordinator {
    /// Sends INJECT for a configuration to every matching tab. Returns how
    /// many tabs accepted it.
    async fn inject_into_matching_tabs(&self, id: &ConfigId) -> usize {
        let Some(config) = self.config(id).await else {
            return 0;
        };
        if !config.is_enabled() || config.matches.is_empty() {
            return 0;
        }

        let tabs = match self.tabs.query(&config.matches).await {
            Ok(tabs) => tabs,
            Err(e) => {
                warn!(config_id = %id, error = %e, "Tab query failed");
                return 0;
            }
        };

        let mut delivered = 0;
        for tab in tabs {
            match self.send_inject_to_tab(tab.id, config.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => debug!(config_id = %id, tab_id = %tab.id, error = %e, "INJECT not delivered"),
            }
        }
        delivered
    }

    /// Sends INJECT to one tab, loading the content script and retrying
    /// once if nothing listens.
    async fn send_inject_to_tab(&self, tab: TabId, config: Configuration) -> Result<()> {
        let message = Message::Inject { config };
        match self.messenger.send_to_tab(tab, message.clone()).await {
            Ok(_) => Ok(()),
            Err(e) if self.options.reinject_content_script() => {
                debug!(tab_id = %tab, error = %e, "Loading content script and retrying INJECT");
                self.tabs.load_content_script(tab).await?;
                self.messenger.send_to_tab(tab, message).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    /// Sends CLEANUP to every tab matching a configuration's patterns.
    async fn cleanup_tabs(&self, id: &ConfigId, config: &Configuration) -> usize {
        if config.matches.is_empty() {
            return 0;
        }

        let tabs = match self.tabs.query(&config.matches).await {
            Ok(tabs) => tabs,
            Err(e) => {
                warn!(config_id = %id, error = %e, "Tab query failed");
                return 0;
            }
        };

        let mut sent = 0;
        for tab in tabs {
            let message = Message::Cleanup {
                config_id: id.clone(),
            };
            match self.messenger.send_to_tab(tab.id, message).await {
                Ok(_) => sent += 1,
                Err(e) => debug!(config_id = %id, tab_id = %tab.id, error = %e, "CLEANUP not delivered"),
            }
        }
        sent
    }
}

// ============================================================================
// Tests
// ============================================================================
