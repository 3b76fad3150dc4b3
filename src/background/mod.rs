//! Background context.
//!
//! The [`Coordinator`] answers dashboard commands and content-script
//! requests, keeps registrations in step with the configuration store and
//! pushes INJECT / CLEANUP to open tabs.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use usersite::background::{Coordinator, CoordinatorOptions, MemoryTabs};
//! use usersite::cache::{CacheFetcher, MemoryBlobStore, MemoryFetch};
//! use usersite::engine::{Engine, EngineApis, MemoryUserScripts};
//! use usersite::storage::MemoryStorage;
//! use usersite::transport::TabRouter;
//!
//! # async fn example() -> usersite::Result<()> {
//! let engine = Engine::probe(EngineApis::new().with_user_scripts(Arc::new(MemoryUserScripts::new())));
//!
//! let coordinator = Coordinator::builder()
//!     .storage(Arc::new(MemoryStorage::new()))
//!     .tabs(Arc::new(MemoryTabs::new()))
//!     .messenger(Arc::new(TabRouter::new()))
//!     .engine(engine)
//!     .cache(CacheFetcher::new(Arc::new(MemoryBlobStore::new()), Arc::new(MemoryFetch::new())))
//!     .options(CoordinatorOptions::new().with_namespace("usersite"))
//!     .build()?;
//!
//! coordinator.init().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`CoordinatorBuilder`] |
//! | `coordinator` | [`Coordinator`]: message handling and commands |
//! | `options` | [`CoordinatorOptions`] |
//! | `tabs` | [`TabHost`] trait and [`MemoryTabs`] |

// ============================================================================
// Submodules
// ============================================================================

mod builder;
mod coordinator;
mod options;
mod tabs;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::CoordinatorBuilder;
pub use coordinator::{Coordinator, TabStatus, jquery_url};
pub use options::CoordinatorOptions;
pub use tabs::{ContentScriptLoader, MemoryTabs, TabHost, TabInfo};
