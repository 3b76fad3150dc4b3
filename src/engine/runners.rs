//! Fallback runners for hosts without a register-based engine.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{RunAt, World};
use crate::error::Result;
use crate::identifiers::TabId;

use super::ScriptRunner;

// ============================================================================
// Constants
// ============================================================================

/// Function executed by [`ScriptingRunner`]: appends a script element
/// carrying the code, then removes it.
pub const SCRIPT_TAG_INJECTOR: &str = "(codeString) => { \
const scriptEl = document.createElement('script'); \
scriptEl.textContent = codeString; \
(document.head || document.documentElement).appendChild(scriptEl); \
scriptEl.remove(); }";

// ============================================================================
// Host Traits
// ============================================================================

/// A scripting API call: run `func(args...)` in a tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInjection {
    /// Target tab.
    pub target: TabId,
    /// Function source.
    pub func: &'static str,
    /// Arguments.
    pub args: Vec<String>,
    /// Execution world.
    pub world: World,
    /// Run without waiting for the document.
    pub inject_immediately: bool,
}

/// Scripting API.
#[async_trait]
pub trait ScriptingApi: Send + Sync {
    /// Executes an injection.
    async fn execute_script(&self, injection: ScriptInjection) -> Result<()>;
}

/// Hidden sandbox iframes inside a tab.
#[async_trait]
pub trait SandboxFrames: Send + Sync {
    /// Loads the sandbox page into a hidden frame named `frame`.
    async fn load(&self, tab: TabId, frame: &str) -> Result<()>;

    /// Posts code to the frame and resolves on its acknowledgment.
    async fn post(&self, tab: TabId, frame: &str, code: &str) -> Result<()>;

    /// Removes the frame.
    async fn remove(&self, tab: TabId, frame: &str) -> Result<()>;
}

/// Single-callback tabs execute API.
#[async_trait]
pub trait LegacyTabsApi: Send + Sync {
    /// Executes inline code in a tab.
    async fn execute_script(&self, tab: TabId, code: &str) -> Result<()>;
}

// ============================================================================
// ScriptingRunner
// ============================================================================

/// Runs code through the scripting API in the isolated world.
pub struct ScriptingRunner {
    api: Arc<dyn ScriptingApi>,
}

impl ScriptingRunner {
    /// Wraps a scripting API.
    #[must_use]
    pub fn new(api: Arc<dyn ScriptingApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ScriptRunner for ScriptingRunner {
    async fn run(&self, tab: TabId, code: &str, run_at: RunAt) -> Result<()> {
        debug!(tab_id = %tab, len = code.len(), "Executing via scripting");
        self.api
            .execute_script(ScriptInjection {
                target: tab,
                func: SCRIPT_TAG_INJECTOR,
                args: vec![code.to_string()],
                world: World::Isolated,
                inject_immediately: run_at == RunAt::DocumentStart,
            })
            .await
    }
}

// ============================================================================
// SandboxRunner
// ============================================================================

/// Runs code inside a throwaway sandbox iframe.
///
/// The frame is removed whether or not the code ran.
pub struct SandboxRunner {
    frames: Arc<dyn SandboxFrames>,
}

impl SandboxRunner {
    /// Wraps a sandbox frame host.
    #[must_use]
    pub fn new(frames: Arc<dyn SandboxFrames>) -> Self {
        Self { frames }
    }
}

#[async_trait]
impl ScriptRunner for SandboxRunner {
    async fn run(&self, tab: TabId, code: &str, _run_at: RunAt) -> Result<()> {
        let frame = format!("usersite-sandbox-{}", uuid::Uuid::new_v4().simple());
        debug!(tab_id = %tab, frame = %frame, "Executing via sandbox frame");

        self.frames.load(tab, &frame).await?;
        let outcome = self.frames.post(tab, &frame, code).await;

        if let Err(e) = self.frames.remove(tab, &frame).await {
            warn!(tab_id = %tab, frame = %frame, error = %e, "Failed to remove sandbox frame");
        }

        outcome
    }
}

// ============================================================================
// LegacyRunner
// ============================================================================

/// Runs code through the legacy tabs API.
pub struct LegacyRunner {
    api: Arc<dyn LegacyTabsApi>,
}

impl LegacyRunner {
    /// Wraps a legacy tabs API.
    #[must_use]
    pub fn new(api: Arc<dyn LegacyTabsApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ScriptRunner for LegacyRunner {
    async fn run(&self, tab: TabId, code: &str, _run_at: RunAt) -> Result<()> {
        debug!(tab_id = %tab, len = code.len(), "Executing via tabs API");
        self.api.execute_script(tab, code).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::engine::{MemoryLegacyTabs, MemorySandbox, MemoryScripting};

    fn tab() -> TabId {
        TabId::new(7).expect("tab")
    }

    #[tokio::test]
    async fn test_scripting_runner_uses_isolated_world() {
        let api = Arc::new(MemoryScripting::new());
        let runner = ScriptingRunner::new(api.clone());

        runner.run(tab(), "a()", RunAt::DocumentStart).await.expect("run");
        runner.run(tab(), "b()", RunAt::DocumentIdle).await.expect("run");

        let calls = api.injections();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].world, World::Isolated);
        assert_eq!(calls[0].args, vec!["a()".to_string()]);
        assert!(calls[0].inject_immediately);
        assert!(!calls[1].inject_immediately);
    }

    #[tokio::test]
    async fn test_sandbox_runner_lifecycle() {
        let frames = Arc::new(MemorySandbox::new());
        let runner = SandboxRunner::new(frames.clone());

        runner.run(tab(), "x()", RunAt::DocumentIdle).await.expect("run");

        let events = frames.events();
        assert_eq!(events.len(), 3);
        assert!(events[0].starts_with("load:"));
        assert!(events[1].starts_with("post:"));
        assert!(events[2].starts_with("remove:"));
        assert_eq!(frames.open_frames(), 0);
    }

    #[tokio::test]
    async fn test_sandbox_runner_removes_frame_on_failure() {
        let frames = Arc::new(MemorySandbox::new());
        frames.reject_posts("blocked by CSP");
        let runner = SandboxRunner::new(frames.clone());

        assert!(runner.run(tab(), "x()", RunAt::DocumentIdle).await.is_err());
        assert_eq!(frames.open_frames(), 0);
    }

    #[tokio::test]
    async fn test_legacy_runner() {
        let api = Arc::new(MemoryLegacyTabs::new());
        let runner = LegacyRunner::new(api.clone());

        runner.run(tab(), "y()", RunAt::DocumentEnd).await.expect("run");

        assert_eq!(api.executed(), vec![(tab(), "y()".to_string())]);
    }
}
