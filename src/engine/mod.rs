//! Script engine abstraction.
//!
//! Hosts expose very different script facilities. Capability detection
//! runs once, when the [`Engine`] is built, and picks exactly one
//! [`EngineKind`]. Everything above this module talks to two interfaces:
//!
//! | Interface | Used when | Implementations |
//! |-----------|-----------|-----------------|
//! | [`ScriptRegistry`] | register-based engines | user scripts API, [`HandleRegistry`] |
//! | [`ScriptRunner`] | no register-based engine | [`ScriptingRunner`], [`SandboxRunner`], [`LegacyRunner`] |
//!
//! Preference order: user scripts, user script handles, scripting,
//! sandbox frames, legacy tabs.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{RunAt, World};
use crate::error::{Error, Result};
use crate::identifiers::{ScriptId, TabId};

// ============================================================================
// Submodules
// ============================================================================

mod handles;
mod memory;
mod runners;

// ============================================================================
// Re-exports
// ============================================================================

pub use handles::{HandleRegistry, HandleScriptsApi, ScriptHandle};
pub use memory::{
    MemoryHandleScripts, MemoryLegacyTabs, MemorySandbox, MemoryScripting, MemoryUserScripts,
};
pub use runners::{
    LegacyRunner, LegacyTabsApi, SCRIPT_TAG_INJECTOR, SandboxFrames, SandboxRunner,
    ScriptInjection, ScriptingApi, ScriptingRunner,
};

// ============================================================================
// Registration Payload
// ============================================================================

/// Executable source. Always code, never a remote reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSource {
    /// Script text.
    pub code: String,
}

/// One registration handed to a [`ScriptRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredScript {
    /// Deterministic engine id.
    pub id: ScriptId,
    /// Match patterns, inherited from the owning configuration.
    pub matches: Vec<String>,
    /// Sources to execute.
    pub js: Vec<ScriptSource>,
    /// Run timing.
    pub run_at: RunAt,
    /// Execution world.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world: Option<World>,
    /// Inject into every frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_frames: Option<bool>,
    /// Patterns to exclude.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_matches: Option<Vec<String>>,
}

// ============================================================================
// Interfaces
// ============================================================================

/// Register-based script engine.
#[async_trait]
pub trait ScriptRegistry: Send + Sync {
    /// Registers scripts. A batch fails as a whole.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Engine`] with the engine's message, e.g.
    /// "Duplicate script ID".
    async fn register(&self, scripts: Vec<RegisteredScript>) -> Result<()>;

    /// Unregisters scripts by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Engine`] with the engine's message, e.g.
    /// "Nonexistent script ID".
    async fn unregister(&self, ids: Vec<ScriptId>) -> Result<()>;
}

/// Direct, one-shot execution in a tab.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Executes `code` in `tab`.
    async fn run(&self, tab: TabId, code: &str, run_at: RunAt) -> Result<()>;
}

// ============================================================================
// Capabilities
// ============================================================================

/// Engine flavor chosen at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Array-based user scripts API.
    UserScripts,
    /// Handle-returning user scripts API.
    UserScriptHandles,
    /// Scripting API, isolated world.
    Scripting,
    /// Sandboxed iframe channel.
    Sandbox,
    /// Single-callback tabs execute API.
    LegacyTabs,
    /// Nothing usable.
    Unavailable,
}

impl EngineKind {
    /// Returns `true` for register-based flavors.
    #[inline]
    #[must_use]
    pub const fn is_register_based(self) -> bool {
        matches!(self, Self::UserScripts | Self::UserScriptHandles)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UserScripts => "userScripts",
            Self::UserScriptHandles => "userScripts (handles)",
            Self::Scripting => "scripting",
            Self::Sandbox => "sandbox",
            Self::LegacyTabs => "tabs.executeScript",
            Self::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// Facilities the host exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Array-based user scripts API.
    pub user_scripts: bool,
    /// Handle-returning user scripts API.
    pub user_script_handles: bool,
    /// Scripting API.
    pub scripting: bool,
    /// Sandbox page loadable in an iframe.
    pub sandbox: bool,
    /// Legacy tabs execute API.
    pub legacy_tabs: bool,
}

impl Capabilities {
    /// Picks the preferred engine flavor.
    #[must_use]
    pub const fn detect(&self) -> EngineKind {
        if self.user_scripts {
            EngineKind::UserScripts
        } else if self.user_script_handles {
            EngineKind::UserScriptHandles
        } else if self.scripting {
            EngineKind::Scripting
        } else if self.sandbox {
            EngineKind::Sandbox
        } else if self.legacy_tabs {
            EngineKind::LegacyTabs
        } else {
            EngineKind::Unavailable
        }
    }
}

// ============================================================================
// EngineApis
// ============================================================================

/// Host facilities offered to [`Engine::probe`].
#[derive(Default)]
pub struct EngineApis {
    user_scripts: Option<Arc<dyn ScriptRegistry>>,
    user_script_handles: Option<Arc<dyn ScriptRegistry>>,
    scripting: Option<Arc<dyn ScriptingApi>>,
    sandbox: Option<Arc<dyn SandboxFrames>>,
    legacy_tabs: Option<Arc<dyn LegacyTabsApi>>,
}

impl EngineApis {
    /// Creates an empty set of facilities.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers an array-based user scripts API.
    #[must_use]
    pub fn with_user_scripts(mut self, api: Arc<dyn ScriptRegistry>) -> Self {
        self.user_scripts = Some(api);
        self
    }

    /// Offers a handle-returning user scripts API.
    #[must_use]
    pub fn with_user_script_handles<A>(mut self, api: Arc<A>) -> Self
    where
        A: HandleScriptsApi + 'static,
    {
        self.user_script_handles = Some(Arc::new(HandleRegistry::new(api)));
        self
    }

    /// Offers the scripting API.
    #[must_use]
    pub fn with_scripting(mut self, api: Arc<dyn ScriptingApi>) -> Self {
        self.scripting = Some(api);
        self
    }

    /// Offers sandbox frames.
    #[must_use]
    pub fn with_sandbox(mut self, frames: Arc<dyn SandboxFrames>) -> Self {
        self.sandbox = Some(frames);
        self
    }

    /// Offers the legacy tabs execute API.
    #[must_use]
    pub fn with_legacy_tabs(mut self, api: Arc<dyn LegacyTabsApi>) -> Self {
        self.legacy_tabs = Some(api);
        self
    }

    /// Facilities present.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            user_scripts: self.user_scripts.is_some(),
            user_script_handles: self.user_script_handles.is_some(),
            scripting: self.scripting.is_some(),
            sandbox: self.sandbox.is_some(),
            legacy_tabs: self.legacy_tabs.is_some(),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// The selected engine: one registry or one runner, never both.
#[derive(Clone)]
pub struct Engine {
    kind: EngineKind,
    capabilities: Capabilities,
    registry: Option<Arc<dyn ScriptRegistry>>,
    runner: Option<Arc<dyn ScriptRunner>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("kind", &self.kind)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Detects capabilities and selects an engine.
    #[must_use]
    pub fn probe(apis: EngineApis) -> Self {
        let capabilities = apis.capabilities();
        let kind = capabilities.detect();

        let (registry, runner): (Option<Arc<dyn ScriptRegistry>>, Option<Arc<dyn ScriptRunner>>) =
            match kind {
                EngineKind::UserScripts => (apis.user_scripts, None),
                EngineKind::UserScriptHandles => (apis.user_script_handles, None),
                EngineKind::Scripting => (
                    None,
                    apis.scripting
                        .map(|api| Arc::new(ScriptingRunner::new(api)) as Arc<dyn ScriptRunner>),
                ),
                EngineKind::Sandbox => (
                    None,
                    apis.sandbox
                        .map(|frames| Arc::new(SandboxRunner::new(frames)) as Arc<dyn ScriptRunner>),
                ),
                EngineKind::LegacyTabs => (
                    None,
                    apis.legacy_tabs
                        .map(|api| Arc::new(LegacyRunner::new(api)) as Arc<dyn ScriptRunner>),
                ),
                EngineKind::Unavailable => (None, None),
            };

        info!(engine = %kind, "Script engine selected");

        Self {
            kind,
            capabilities,
            registry,
            runner,
        }
    }

    /// An engine with no facilities.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::probe(EngineApis::new())
    }

    /// Selected flavor.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    /// Facilities seen at probe time.
    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Registry, for register-based flavors.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> Option<Arc<dyn ScriptRegistry>> {
        self.registry.clone()
    }

    /// Runs code directly through the fallback runner.
    ///
    /// # Errors
    ///
    /// - [`Error::EngineUnavailable`] if no runner was selected
    /// - the runner's error otherwise
    pub async fn run(&self, tab: TabId, code: &str, run_at: RunAt) -> Result<()> {
        match &self.runner {
            Some(runner) => runner.run(tab, code, run_at).await,
            None => Err(Error::EngineUnavailable),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
