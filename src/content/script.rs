//! Injection Executor.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

use crate::cache::is_http_url;
use crate::config::{Configuration, CssOptions, InjectAt, ItemSource, JsOptions, RunAt};
use crate::error::{Error, Result};
use crate::identifiers::{ConfigId, TabId, item_identity};
use crate::protocol::{Message, Response};
use crate::storage::{KeyValueStore, StorageKeys, decode_data_url, load_file_map};
use crate::transport::{BackgroundPort, Inbox};

use super::{Document, Placement, StyleElement};

// ============================================================================
// Types
// ============================================================================

/// Kind of injected artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// A style element.
    Css,
    /// A registered or executed script.
    Js,
}

/// De-duplication key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InjectedKey {
    /// Artifact kind.
    pub kind: ArtifactKind,
    /// Owning configuration.
    pub config_id: ConfigId,
    /// Item name.
    pub item: String,
}

impl InjectedKey {
    fn new(kind: ArtifactKind, config_id: &ConfigId, item: &str) -> Self {
        Self {
            kind,
            config_id: config_id.clone(),
            item: item.to_string(),
        }
    }
}

/// Result of [`ContentScript::inject_css`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CssOutcome {
    /// A new style element was inserted.
    Inserted,
    /// Waiting for `<body>`.
    Deferred,
    /// An element from an earlier instance was found and kept.
    Reused,
    /// Already injected by this instance.
    AlreadyInjected,
    /// Content could not be resolved.
    Skipped,
}

/// Counts from [`ContentScript::inject_config`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InjectionSummary {
    /// CSS items placed or already present.
    pub css: usize,
    /// JS items handed to the background.
    pub js: usize,
    /// Items that failed.
    pub failed: usize,
}

// ============================================================================
// ContentScript
// ============================================================================

/// Per-document injector.
pub struct ContentScript<D: Document> {
    document: Mutex<D>,
    port: Arc<dyn BackgroundPort>,
    storage: Arc<dyn KeyValueStore>,
    keys: StorageKeys,
    injected: Mutex<FxHashSet<InjectedKey>>,
    tab_id: Mutex<Option<TabId>>,
}

impl<D: Document> fmt::Debug for ContentScript<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentScript")
            .field("url", &self.document.lock().url())
            .field("injected", &self.injected.lock().len())
            .finish_non_exhaustive()
    }
}

impl<D: Document> ContentScript<D> {
    /// Creates a content script for `document`.
    #[must_use]
    pub fn new(
        document: D,
        port: Arc<dyn BackgroundPort>,
        storage: Arc<dyn KeyValueStore>,
        keys: StorageKeys,
    ) -> Self {
        Self {
            document: Mutex::new(document),
            port,
            storage,
            keys,
            injected: Mutex::new(FxHashSet::default()),
            tab_id: Mutex::new(None),
        }
    }

    /// Reads the document.
    pub fn with_document<R>(&self, f: impl FnOnce(&D) -> R) -> R {
        f(&self.document.lock())
    }

    /// Mutates the document, e.g. to simulate parsing progress.
    pub fn with_document_mut<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut self.document.lock())
    }

    /// Returns `true` if the item is in the de-duplication table.
    #[must_use]
    pub fn is_injected(&self, kind: ArtifactKind, config_id: &ConfigId, item: &str) -> bool {
        self.injected
            .lock()
            .contains(&InjectedKey::new(kind, config_id, item))
    }

    /// Number of de-duplication entries for a configuration.
    #[must_use]
    pub fn injected_count(&self, config_id: &ConfigId) -> usize {
        self.injected
            .lock()
            .iter()
            .filter(|key| &key.config_id == config_id)
            .count()
    }

    // ========================================================================
    // CSS
    // ========================================================================

    /// Places one CSS item.
    ///
    /// Inline code wins over `file_name`; http(s) files must already be
    /// cached. Unresolvable content is logged and skipped.
    pub async fn inject_css(
        &self,
        config_id: &ConfigId,
        file_name: &str,
        inject_at: InjectAt,
        inline_code: Option<&str>,
    ) -> CssOutcome {
        let key = InjectedKey::new(ArtifactKind::Css, config_id, file_name);
        if !self.injected.lock().insert(key.clone()) {
            return CssOutcome::AlreadyInjected;
        }

        let css = match inline_code {
            Some(code) => Ok(code.to_string()),
            None => self.resolve_css(config_id, file_name).await,
        };
        let css = match css {
            Ok(css) => css,
            Err(e) => {
                warn!(config_id = %config_id, file = file_name, error = %e, "CSS not injected");
                self.injected.lock().remove(&key);
                return CssOutcome::Skipped;
            }
        };

        let mut document = self.document.lock();
        if document.find_style(config_id, file_name) {
            debug!(config_id = %config_id, file = file_name, "Reusing existing style");
            return CssOutcome::Reused;
        }

        let style = StyleElement::new(config_id.clone(), file_name, css);
        let outcome = match inject_at {
            InjectAt::Head if document.has_head() => {
                document.insert_style(style, Placement::Head);
                CssOutcome::Inserted
            }
            InjectAt::Head => {
                document.insert_style(style, Placement::Root);
                CssOutcome::Inserted
            }
            InjectAt::BodyStart | InjectAt::BodyEnd => {
                let placement = if inject_at == InjectAt::BodyStart {
                    Placement::BodyStart
                } else {
                    Placement::BodyEnd
                };
                if document.has_body() {
                    document.insert_style(style, placement);
                    CssOutcome::Inserted
                } else {
                    debug!(config_id = %config_id, file = file_name, "Body not ready, deferring style");
                    document.insert_when_body_ready(style, placement);
                    CssOutcome::Deferred
                }
            }
        };

        debug!(config_id = %config_id, file = file_name, ?inject_at, "CSS injected");
        outcome
    }

    async fn resolve_css(&self, config_id: &ConfigId, file_name: &str) -> Result<String> {
        if is_http_url(file_name) {
            let response = self
                .port
                .send(Message::GetCachedContent {
                    config_id: config_id.clone(),
                    url: file_name.to_string(),
                })
                .await?
                .into_result()?;
            return response
                .content
                .ok_or_else(|| Error::not_found("Cached asset", file_name));
        }

        let files = load_file_map(self.storage.as_ref(), &self.keys, config_id).await?;
        let data_url = files
            .get(file_name)
            .ok_or_else(|| Error::not_found("CSS file", file_name))?;
        let bytes = decode_data_url(data_url)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    // ========================================================================
    // JS
    // ========================================================================

    /// Hands one JS item to the background.
    ///
    /// Returns `false` if the item was already injected into this document.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if neither file nor code is given
    /// - the tab id lookup or background error otherwise
    pub async fn inject_js(
        &self,
        config_id: &ConfigId,
        file_name: Option<&str>,
        code: Option<&str>,
        run_at: RunAt,
        tab_id: Option<TabId>,
    ) -> Result<bool> {
        let item = match (file_name, code) {
            (Some(file), _) => file.to_string(),
            (None, Some(code)) => item_identity(&ItemSource::Inline(code.to_string())),
            (None, None) => {
                return Err(Error::invalid_argument("JS item has neither file nor code"));
            }
        };

        let key = InjectedKey::new(ArtifactKind::Js, config_id, &item);
        if !self.injected.lock().insert(key.clone()) {
            return Ok(false);
        }

        let result = self
            .send_inject_js(config_id, file_name, code, run_at, tab_id)
            .await;
        if let Err(e) = result {
            self.injected.lock().remove(&key);
            return Err(e);
        }

        debug!(config_id = %config_id, item = %item, "JS injected");
        Ok(true)
    }

    async fn send_inject_js(
        &self,
        config_id: &ConfigId,
        file_name: Option<&str>,
        code: Option<&str>,
        run_at: RunAt,
        tab_id: Option<TabId>,
    ) -> Result<()> {
        let tab_id = match tab_id {
            Some(tab_id) => tab_id,
            None => self.tab_id().await?,
        };

        self.port
            .send(Message::InjectJs {
                config_id: config_id.clone(),
                js_file_name: file_name.map(str::to_string),
                js_code: code.map(str::to_string),
                run_at,
                tab_id: Some(tab_id),
            })
            .await?
            .into_result()?;
        Ok(())
    }

    /// This document's tab, asked of the background once and cached.
    ///
    /// # Errors
    ///
    /// Returns the background error, or [`Error::Protocol`] if the answer
    /// carries no tab id.
    pub async fn tab_id(&self) -> Result<TabId> {
        let cached = *self.tab_id.lock();
        if let Some(tab_id) = cached {
            return Ok(tab_id);
        }

        let response = self.port.send(Message::GetTabId).await?.into_result()?;
        let tab_id = response
            .tab_id
            .ok_or_else(|| Error::protocol("Could not determine tab ID"))?;
        *self.tab_id.lock() = Some(tab_id);
        Ok(tab_id)
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Injects every item of an enabled configuration: CSS first, then JS.
    ///
    /// Each item is independent; failures are counted, not propagated.
    pub async fn inject_config(&self, config: &Configuration, tab_id: Option<TabId>) -> InjectionSummary {
        let mut summary = InjectionSummary::default();
        if !config.is_enabled() {
            return summary;
        }
        let Some(config_id) = &config.id else {
            warn!(name = %config.name, "Configuration without id not injected");
            return summary;
        };
        if let Some(tab_id) = tab_id {
            *self.tab_id.lock() = Some(tab_id);
        }

        for (index, item) in config.css.iter().enumerate() {
            let name = item
                .file_name()
                .map_or_else(|| format!("inline_{index}"), str::to_string);
            let inject_at = CssOptions::resolve(&item.options, config.css_default.as_ref());

            match self.inject_css(config_id, &name, inject_at, item.code()).await {
                CssOutcome::Skipped => summary.failed += 1,
                _ => summary.css += 1,
            }
        }

        for item in &config.js {
            let resolved = JsOptions::resolve(&item.options, config.js_default.as_ref());
            match self
                .inject_js(config_id, item.file_name(), item.code(), resolved.run_at, tab_id)
                .await
            {
                Ok(_) => summary.js += 1,
                Err(e) => {
                    warn!(config_id = %config_id, error = %e, "JS not injected");
                    summary.failed += 1;
                }
            }
        }

        debug!(
            config_id = %config_id,
            css = summary.css,
            js = summary.js,
            failed = summary.failed,
            "Configuration injected"
        );
        summary
    }

    /// Removes everything a configuration placed in this document.
    pub fn cleanup(&self, config_id: &ConfigId) -> usize {
        let removed = self.document.lock().remove_tagged(config_id);
        self.injected
            .lock()
            .retain(|key| &key.config_id != config_id);
        debug!(config_id = %config_id, removed, "Cleaned up");
        removed
    }

    /// Injects every enabled configuration matching the document URL.
    ///
    /// # Errors
    ///
    /// Returns the background error if the configuration list is
    /// unavailable.
    pub async fn init(&self) -> Result<usize> {
        let url = self.document.lock().url().to_string();
        let response = self.port.send(Message::GetConfigs).await?.into_result()?;

        let mut injected = 0;
        for config in response.configs.unwrap_or_default() {
            if config.is_enabled() && config.matches_url(&url) {
                self.inject_config(&config, None).await;
                injected += 1;
            }
        }

        info!(url = %url, configs = injected, "Content script initialized");
        Ok(injected)
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Handles a background message. Never fails; errors become responses.
    pub async fn handle(&self, message: Message) -> Response {
        match message {
            Message::Inject { config } => {
                self.inject_config(&config, None).await;
                Response::ok()
            }
            Message::Cleanup { config_id } => {
                self.cleanup(&config_id);
                Response::ok()
            }
            other => Response::failure(Error::protocol(format!(
                "Unsupported message: {}",
                other.kind()
            ))),
        }
    }
}

impl<D: Document + 'static> ContentScript<D> {
    /// Answers messages from `inbox` until the router drops it.
    pub async fn serve(self: Arc<Self>, mut inbox: Inbox) {
        while let Some(envelope) = inbox.recv().await {
            let response = self.handle(envelope.message).await;
            if envelope.reply.send(response).is_err() {
                debug!("Reply receiver dropped");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
