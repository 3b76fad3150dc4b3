//! UserSite - configuration-to-injection pipeline for a site customization
//! browser extension.
//!
//! Users define configurations that map URL match patterns to JS/CSS
//! resources. This library keeps those configurations, matches them
//! against page URLs and gets their resources into pages, either through
//! persistent engine registrations or through direct DOM injection.
//!
//! # Architecture
//!
//! Two kinds of execution context talk over request/response messages:
//!
//! - **Background** ([`Coordinator`]): owns the [`ConfigStore`] and the
//!   registration [`Reconciler`], answers dashboard commands and
//!   content-script requests, pushes INJECT / CLEANUP to tabs
//! - **Content** ([`ContentScript`]): one per document, injects CSS into
//!   the DOM, delegates JS to the background, de-duplicates per document
//!
//! Every browser facility (storage, tabs, script engines, blob cache,
//! network) is a trait, with in-memory implementations for tests.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use usersite::background::MemoryTabs;
//! use usersite::cache::{CacheFetcher, MemoryBlobStore, MemoryFetch};
//! use usersite::config::{Configuration, CssItem};
//! use usersite::content::MemoryDocument;
//! use usersite::engine::{EngineApis, MemoryUserScripts};
//! use usersite::protocol::Sender;
//! use usersite::storage::{MemoryStorage, StorageKeys};
//! use usersite::transport::{LocalPort, TabRouter};
//! use usersite::{ConfigId, ContentScript, Coordinator, Engine, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let storage = Arc::new(MemoryStorage::new());
//!     let tabs = Arc::new(MemoryTabs::new());
//!     let router = Arc::new(TabRouter::new());
//!
//!     let engine = Engine::probe(
//!         EngineApis::new().with_user_scripts(Arc::new(MemoryUserScripts::new())),
//!     );
//!     let coordinator = Arc::new(
//!         Coordinator::builder()
//!             .storage(storage.clone())
//!             .tabs(tabs.clone())
//!             .messenger(router.clone())
//!             .engine(engine)
//!             .cache(CacheFetcher::new(
//!                 Arc::new(MemoryBlobStore::new()),
//!                 Arc::new(MemoryFetch::new()),
//!             ))
//!             .build()?,
//!     );
//!     coordinator.init().await;
//!
//!     // A tab with its content script
//!     let url = "https://example.com/page";
//!     let tab = tabs.open(url);
//!     let port = Arc::new(LocalPort::new(coordinator.clone(), Sender::tab(tab, url)));
//!     let content = Arc::new(ContentScript::new(
//!         MemoryDocument::new(url),
//!         port,
//!         storage.clone(),
//!         StorageKeys::default(),
//!     ));
//!     tokio::spawn(content.clone().serve(router.connect(tab)));
//!
//!     let config = Configuration::new("demo")
//!         .with_match("*://example.com/*")
//!         .with_css(CssItem::inline("body { color: red }"));
//!     coordinator.add_config(ConfigId::new("demo-id"), config).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`background`] | [`Coordinator`], builder, options, tab host |
//! | [`cache`] | CDN asset cache over a blob store |
//! | [`config`] | Data model, URL matcher, [`ConfigStore`] |
//! | [`content`] | [`ContentScript`] and the [`Document`](content::Document) seam |
//! | [`engine`] | Capability probing and script engine adapters |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ids and deterministic id derivation |
//! | [`protocol`] | Tagged messages and responses |
//! | [`registry`] | Registration [`Reconciler`] |
//! | [`source`] | Configuration directories |
//! | [`storage`] | Key-value storage, file maps, directory handles |
//! | [`transport`] | In-process message routing |

// ============================================================================
// Modules
// ============================================================================

/// Background context: coordinator, builder and tab host.
///
/// Use [`Coordinator::builder()`] to wire a coordinator.
pub mod background;

/// CDN asset cache.
pub mod cache;

/// Site configurations: model, matcher and store.
pub mod config;

/// Content context: per-document injection.
pub mod content;

/// Script engines.
///
/// [`Engine::probe`] picks one flavor at startup from the available
/// facilities.
pub mod engine;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Message protocol between contexts.
pub mod protocol;

/// Script registration bookkeeping.
pub mod registry;

/// Configuration directories on disk.
pub mod source;

/// Durable storage.
pub mod storage;

/// Message transport between contexts.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Background types
pub use background::{Coordinator, CoordinatorBuilder, CoordinatorOptions};

// Configuration types
pub use config::{ConfigStore, Configuration, CssItem, JsItem, RunAt, World};

// Content types
pub use content::ContentScript;

// Engine types
pub use engine::{Engine, EngineKind};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConfigId, ScriptId, TabId};

// Registry types
pub use registry::Reconciler;
