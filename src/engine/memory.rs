//! In-memory engines.
//!
//! These mirror the observable behavior of the real host APIs, including
//! their error messages, so the reconciler's error handling is exercised
//! against the same strings it sees in a browser.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::error::{Error, Result};
use crate::identifiers::{ScriptId, TabId};

use super::{
    HandleScriptsApi, LegacyTabsApi, RegisteredScript, SandboxFrames, ScriptHandle,
    ScriptInjection, ScriptRegistry, ScriptingApi,
};

// ============================================================================
// MemoryUserScripts
// ============================================================================

/// Array-based user scripts engine.
///
/// Registering a live id fails with "Duplicate script ID"; unregistering
/// an unknown id fails the whole call with "Nonexistent script ID".
#[derive(Debug, Default)]
pub struct MemoryUserScripts {
    scripts: Mutex<Vec<RegisteredScript>>,
    register_calls: AtomicUsize,
    unregister_calls: AtomicUsize,
    latency: Option<Duration>,
    rejection: Mutex<Option<String>>,
}

impl MemoryUserScripts {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every register call, to widen race windows.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fails the next register call with `message`.
    pub fn reject_next(&self, message: impl Into<String>) {
        *self.rejection.lock() = Some(message.into());
    }

    /// Live registrations, in registration order.
    #[must_use]
    pub fn scripts(&self) -> Vec<RegisteredScript> {
        self.scripts.lock().clone()
    }

    /// Live ids.
    #[must_use]
    pub fn ids(&self) -> Vec<ScriptId> {
        self.scripts.lock().iter().map(|s| s.id.clone()).collect()
    }

    /// Returns `true` if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &ScriptId) -> bool {
        self.scripts.lock().iter().any(|s| &s.id == id)
    }

    /// Register calls issued, successful or not.
    #[must_use]
    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    /// Unregister calls issued, successful or not.
    #[must_use]
    pub fn unregister_calls(&self) -> usize {
        self.unregister_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptRegistry for MemoryUserScripts {
    async fn register(&self, scripts: Vec<RegisteredScript>) -> Result<()> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let rejection = self.rejection.lock().take();
        if let Some(message) = rejection {
            return Err(Error::engine(message));
        }

        let mut live = self.scripts.lock();
        for (index, script) in scripts.iter().enumerate() {
            let taken = live.iter().any(|s| s.id == script.id)
                || scripts[..index].iter().any(|s| s.id == script.id);
            if taken {
                return Err(Error::engine(format!("Duplicate script ID '{}'", script.id)));
            }
        }
        live.extend(scripts);
        Ok(())
    }

    async fn unregister(&self, ids: Vec<ScriptId>) -> Result<()> {
        self.unregister_calls.fetch_add(1, Ordering::SeqCst);

        let mut live = self.scripts.lock();
        if let Some(missing) = ids.iter().find(|id| !live.iter().any(|s| &s.id == *id)) {
            return Err(Error::engine(format!("Nonexistent script ID '{missing}'")));
        }
        live.retain(|s| !ids.contains(&s.id));
        Ok(())
    }
}

// ============================================================================
// MemoryHandleScripts
// ============================================================================

type LiveHandles = Arc<Mutex<Vec<(u64, RegisteredScript)>>>;

/// Handle-returning user scripts engine.
#[derive(Debug, Default)]
pub struct MemoryHandleScripts {
    live: LiveHandles,
    next: AtomicU64,
    fail_disposal: Arc<AtomicBool>,
}

impl MemoryHandleScripts {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live registrations.
    #[must_use]
    pub fn scripts(&self) -> Vec<RegisteredScript> {
        self.live.lock().iter().map(|(_, s)| s.clone()).collect()
    }

    /// Makes every handle disposal fail while `fail` is set.
    pub fn fail_disposal(&self, fail: bool) {
        self.fail_disposal.store(fail, Ordering::SeqCst);
    }
}

/// Handle returned by [`MemoryHandleScripts`].
#[derive(Debug)]
pub struct MemoryScriptHandle {
    key: u64,
    live: LiveHandles,
    fail_disposal: Arc<AtomicBool>,
}

#[async_trait]
impl ScriptHandle for MemoryScriptHandle {
    async fn unregister(&self) -> Result<()> {
        if self.fail_disposal.load(Ordering::SeqCst) {
            return Err(Error::engine("Script handle could not be disposed"));
        }
        self.live.lock().retain(|(key, _)| *key != self.key);
        Ok(())
    }
}

#[async_trait]
impl HandleScriptsApi for MemoryHandleScripts {
    type Handle = MemoryScriptHandle;

    async fn register(&self, script: RegisteredScript) -> Result<Self::Handle> {
        let key = self.next.fetch_add(1, Ordering::SeqCst);
        self.live.lock().push((key, script));
        Ok(MemoryScriptHandle {
            key,
            live: Arc::clone(&self.live),
            fail_disposal: Arc::clone(&self.fail_disposal),
        })
    }
}

// ============================================================================
// MemoryScripting
// ============================================================================

/// Scripting API that records injections.
#[derive(Debug, Default)]
pub struct MemoryScripting {
    injections: Mutex<Vec<ScriptInjection>>,
}

impl MemoryScripting {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Injections executed so far.
    #[must_use]
    pub fn injections(&self) -> Vec<ScriptInjection> {
        self.injections.lock().clone()
    }
}

#[async_trait]
impl ScriptingApi for MemoryScripting {
    async fn execute_script(&self, injection: ScriptInjection) -> Result<()> {
        self.injections.lock().push(injection);
        Ok(())
    }
}

// ============================================================================
// MemorySandbox
// ============================================================================

/// Sandbox frame host that records frame lifecycle events.
#[derive(Debug, Default)]
pub struct MemorySandbox {
    events: Mutex<Vec<String>>,
    open: Mutex<FxHashSet<(TabId, String)>>,
    rejection: Mutex<Option<String>>,
}

impl MemorySandbox {
    /// Creates an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every post fail with `message`.
    pub fn reject_posts(&self, message: impl Into<String>) {
        *self.rejection.lock() = Some(message.into());
    }

    /// Lifecycle events as `load:<frame>`, `post:<frame>`, `remove:<frame>`.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Frames currently loaded.
    #[must_use]
    pub fn open_frames(&self) -> usize {
        self.open.lock().len()
    }
}

#[async_trait]
impl SandboxFrames for MemorySandbox {
    async fn load(&self, tab: TabId, frame: &str) -> Result<()> {
        self.open.lock().insert((tab, frame.to_string()));
        self.events.lock().push(format!("load:{frame}"));
        Ok(())
    }

    async fn post(&self, tab: TabId, frame: &str, _code: &str) -> Result<()> {
        self.events.lock().push(format!("post:{frame}"));
        if !self.open.lock().contains(&(tab, frame.to_string())) {
            return Err(Error::engine(format!("Sandbox frame not loaded: {frame}")));
        }
        let rejection = self.rejection.lock().clone();
        match rejection {
            Some(message) => Err(Error::engine(message)),
            None => Ok(()),
        }
    }

    async fn remove(&self, tab: TabId, frame: &str) -> Result<()> {
        self.open.lock().remove(&(tab, frame.to_string()));
        self.events.lock().push(format!("remove:{frame}"));
        Ok(())
    }
}

// ============================================================================
// MemoryLegacyTabs
// ============================================================================

/// Legacy tabs API that records executed code.
#[derive(Debug, Default)]
pub struct MemoryLegacyTabs {
    executed: Mutex<Vec<(TabId, String)>>,
}

impl MemoryLegacyTabs {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Code executed so far, per tab.
    #[must_use]
    pub fn executed(&self) -> Vec<(TabId, String)> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl LegacyTabsApi for MemoryLegacyTabs {
    async fn execute_script(&self, tab: TabId, code: &str) -> Result<()> {
        self.executed.lock().push((tab, code.to_string()));
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::RunAt;
    use crate::engine::ScriptSource;

    fn script(id: &str) -> RegisteredScript {
        RegisteredScript {
            id: ScriptId::new(id),
            matches: vec!["<all_urls>".into()],
            js: vec![ScriptSource { code: "1".into() }],
            run_at: RunAt::DocumentIdle,
            world: None,
            all_frames: None,
            exclude_matches: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let engine = MemoryUserScripts::new();
        engine.register(vec![script("a")]).await.expect("register");

        let err = engine.register(vec![script("a")]).await.unwrap_err();
        assert!(err.is_duplicate_script_id());
        assert_eq!(engine.ids(), vec![ScriptId::new("a")]);
        assert_eq!(engine.register_calls(), 2);
    }

    #[tokio::test]
    async fn test_unregister_is_atomic() {
        let engine = MemoryUserScripts::new();
        engine.register(vec![script("a")]).await.expect("register");

        let err = engine
            .unregister(vec![ScriptId::new("a"), ScriptId::new("b")])
            .await
            .unwrap_err();
        assert!(err.is_nonexistent_script_id());
        assert!(engine.contains(&ScriptId::new("a")));

        engine.unregister(vec![ScriptId::new("a")]).await.expect("unregister");
        assert!(engine.scripts().is_empty());
    }

    #[tokio::test]
    async fn test_reject_next_applies_once() {
        let engine = MemoryUserScripts::new();
        engine.reject_next("Permission denied");

        assert!(engine.register(vec![script("a")]).await.is_err());
        engine.register(vec![script("a")]).await.expect("register");
    }

    #[tokio::test]
    async fn test_handle_unregister() {
        let engine = MemoryHandleScripts::new();
        let first = engine.register(script("a")).await.expect("register");
        let _second = engine.register(script("b")).await.expect("register");

        first.unregister().await.expect("unregister");
        first.unregister().await.expect("unregister again");

        let ids: Vec<_> = engine.scripts().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![ScriptId::new("b")]);
    }
}
