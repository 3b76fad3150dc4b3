//! Handle-returning user scripts flavor.
//!
//! This engine hands back a disposable handle per registered script and
//! knows nothing about ids. [`HandleRegistry`] keeps a private id to
//! handle table so the flavor can sit behind [`ScriptRegistry`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::Result;
use crate::identifiers::ScriptId;

use super::{RegisteredScript, ScriptRegistry};

// ============================================================================
// Traits
// ============================================================================

/// A live registration.
#[async_trait]
pub trait ScriptHandle: Send + Sync {
    /// Disposes the registration.
    async fn unregister(&self) -> Result<()>;
}

/// Handle-returning registration API.
#[async_trait]
pub trait HandleScriptsApi: Send + Sync {
    /// Handle type returned by [`register`](Self::register).
    type Handle: ScriptHandle + 'static;

    /// Registers one script. `id` and `world` are not meaningful here.
    async fn register(&self, script: RegisteredScript) -> Result<Self::Handle>;
}

// ============================================================================
// HandleRegistry
// ============================================================================

/// Adapts a [`HandleScriptsApi`] to [`ScriptRegistry`].
pub struct HandleRegistry<A: HandleScriptsApi> {
    api: Arc<A>,
    handles: Mutex<FxHashMap<ScriptId, Arc<A::Handle>>>,
}

impl<A: HandleScriptsApi> HandleRegistry<A> {
    /// Wraps a handle API.
    #[must_use]
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            handles: Mutex::new(FxHashMap::default()),
        }
    }

    /// Number of tracked handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    /// Returns `true` if no handle is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}

#[async_trait]
impl<A: HandleScriptsApi + 'static> ScriptRegistry for HandleRegistry<A> {
    async fn register(&self, scripts: Vec<RegisteredScript>) -> Result<()> {
        for mut script in scripts {
            let id = script.id.clone();

            let previous = self.handles.lock().get(&id).cloned();
            if let Some(previous) = previous {
                debug!(script_id = %id, "Replacing existing handle");
                previous.unregister().await?;
                self.handles.lock().remove(&id);
            }

            script.world = None;
            let handle = self.api.register(script).await?;
            self.handles.lock().insert(id, Arc::new(handle));
        }
        Ok(())
    }

    async fn unregister(&self, ids: Vec<ScriptId>) -> Result<()> {
        for id in ids {
            let handle = self.handles.lock().get(&id).cloned();
            match handle {
                Some(handle) => {
                    handle.unregister().await?;
                    self.handles.lock().remove(&id);
                }
                None => debug!(script_id = %id, "No handle to dispose"),
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::{RunAt, World};
    use crate::engine::{MemoryHandleScripts, ScriptSource};

    fn script(id: &str, code: &str) -> RegisteredScript {
        RegisteredScript {
            id: ScriptId::new(id),
            matches: vec!["*://example.com/*".into()],
            js: vec![ScriptSource { code: code.into() }],
            run_at: RunAt::DocumentIdle,
            world: Some(World::Main),
            all_frames: None,
            exclude_matches: None,
        }
    }

    #[tokio::test]
    async fn test_register_drops_world() {
        let api = Arc::new(MemoryHandleScripts::new());
        let registry = HandleRegistry::new(api.clone());

        registry.register(vec![script("a", "1")]).await.expect("register");

        let live = api.scripts();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].world, None);
    }

    #[tokio::test]
    async fn test_reregister_disposes_previous_handle() {
        let api = Arc::new(MemoryHandleScripts::new());
        let registry = HandleRegistry::new(api.clone());

        registry.register(vec![script("a", "1")]).await.expect("register");
        registry.register(vec![script("a", "2")]).await.expect("register again");

        assert_eq!(registry.len(), 1);
        let live = api.scripts();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].js[0].code, "2");
    }

    #[tokio::test]
    async fn test_failed_disposal_keeps_handle_tracked() {
        let api = Arc::new(MemoryHandleScripts::new());
        let registry = HandleRegistry::new(api.clone());
        registry.register(vec![script("a", "1")]).await.expect("register");

        api.fail_disposal(true);
        assert!(registry.register(vec![script("a", "2")]).await.is_err());
        assert!(registry.unregister(vec![ScriptId::new("a")]).await.is_err());
        assert_eq!(registry.len(), 1);
        assert_eq!(api.scripts()[0].js[0].code, "1");

        api.fail_disposal(false);
        registry
            .unregister(vec![ScriptId::new("a")])
            .await
            .expect("unregister");
        assert!(registry.is_empty());
        assert!(api.scripts().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_quiet() {
        let api = Arc::new(MemoryHandleScripts::new());
        let registry = HandleRegistry::new(api.clone());
        registry.register(vec![script("a", "1")]).await.expect("register");

        registry
            .unregister(vec![ScriptId::new("a"), ScriptId::new("missing")])
            .await
            .expect("unregister");

        assert!(registry.is_empty());
        assert!(api.scripts().is_empty());
    }
}
