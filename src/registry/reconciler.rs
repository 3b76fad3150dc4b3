//! Registration Record table and the register/unregister state machine.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, error, info, warn};

use crate::config::{Configuration, JsItem, JsOptions, RunAt};
use crate::engine::{RegisteredScript, ScriptRegistry, ScriptSource};
use crate::error::{Error, Result};
use crate::identifiers::{ConfigId, ScriptId, item_identity, script_engine_id};

// ============================================================================
// Types
// ============================================================================

/// Key of a Registration Record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrationKey {
    /// Owning configuration.
    pub config_id: ConfigId,
    /// Item identity.
    pub identity: String,
}

impl RegistrationKey {
    /// Creates a key.
    #[must_use]
    pub fn new(config_id: ConfigId, identity: impl Into<String>) -> Self {
        Self {
            config_id,
            identity: identity.into(),
        }
    }

    /// Key for an item of a configuration.
    #[must_use]
    pub fn for_item(config_id: &ConfigId, item: &JsItem) -> Self {
        Self::new(config_id.clone(), item_identity(&item.source))
    }

    /// Deterministic engine id for this key.
    #[must_use]
    pub fn script_id(&self) -> ScriptId {
        script_engine_id(&self.config_id, &self.identity)
    }
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.config_id, self.identity)
    }
}

/// State of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    /// Nothing known.
    Unregistered,
    /// A register call is in flight.
    Pending,
    /// Registered under this engine id.
    Registered(ScriptId),
}

/// Result of [`Reconciler::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// This call registered the script, or found it already held by the engine.
    Registered(ScriptId),
    /// Already registered or pending; nothing was issued.
    AlreadyActive,
    /// The configuration has no match patterns.
    Skipped,
}

/// A script the reconciler should hold after a full rebuild.
#[derive(Debug, Clone)]
pub struct DesiredScript {
    /// Owning configuration (must carry an id).
    pub config: Configuration,
    /// The JS item.
    pub item: JsItem,
    /// Resolved source text.
    pub code: String,
}

/// Summary of [`Reconciler::reconcile_all`].
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Ids the unregister phase targeted.
    pub unregistered: usize,
    /// Scripts registered.
    pub registered: usize,
    /// Scripts skipped for lack of match patterns.
    pub skipped: usize,
    /// Per-script failures.
    pub failed: Vec<Error>,
}

#[derive(Debug, Default)]
struct Table {
    records: FxHashMap<RegistrationKey, ScriptId>,
    pending: FxHashSet<RegistrationKey>,
}

/// Clears the pending marker on every exit path, including cancellation.
struct PendingGuard {
    table: Arc<Mutex<Table>>,
    key: RegistrationKey,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.lock().pending.remove(&self.key);
    }
}

// ============================================================================
// Reconciler
// ============================================================================

/// Drives a [`ScriptRegistry`] and tracks what it holds.
pub struct Reconciler {
    registry: Arc<dyn ScriptRegistry>,
    table: Arc<Mutex<Table>>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.lock();
        f.debug_struct("Reconciler")
            .field("records", &table.records.len())
            .field("pending", &table.pending.len())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler with an empty table.
    #[must_use]
    pub fn new(registry: Arc<dyn ScriptRegistry>) -> Self {
        Self {
            registry,
            table: Arc::new(Mutex::new(Table::default())),
        }
    }

    /// Current state of a key.
    #[must_use]
    pub fn state(&self, key: &RegistrationKey) -> RegistrationState {
        let table = self.table.lock();
        if let Some(id) = table.records.get(key) {
            RegistrationState::Registered(id.clone())
        } else if table.pending.contains(key) {
            RegistrationState::Pending
        } else {
            RegistrationState::Unregistered
        }
    }

    /// Engine ids currently recorded.
    #[must_use]
    pub fn tracked(&self) -> Vec<ScriptId> {
        self.table.lock().records.values().cloned().collect()
    }

    /// Registers one JS item of a configuration.
    ///
    /// A second call for the same key while the first is pending, or after
    /// it succeeded, is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the configuration has no id
    /// - [`Error::RegistrationFailure`] if the engine rejects the script for
    ///   any reason other than a duplicate id
    pub async fn register(
        &self,
        config: &Configuration,
        item: &JsItem,
        code: String,
        run_at: RunAt,
    ) -> Result<RegisterOutcome> {
        let config_id = config
            .id
            .as_ref()
            .ok_or_else(|| Error::invalid_argument("configuration has no id"))?;

        if config.matches.is_empty() {
            debug!(config_id = %config_id, "No match patterns, registration skipped");
            return Ok(RegisterOutcome::Skipped);
        }

        let key = RegistrationKey::for_item(config_id, item);
        {
            let mut table = self.table.lock();
            if table.records.contains_key(&key) || table.pending.contains(&key) {
                debug!(key = %key, "Registration already active");
                return Ok(RegisterOutcome::AlreadyActive);
            }
            table.pending.insert(key.clone());
        }
        let guard = PendingGuard {
            table: Arc::clone(&self.table),
            key: key.clone(),
        };

        let script_id = key.script_id();
        let resolved = JsOptions::resolve(&item.options, config.js_default.as_ref());
        let script = RegisteredScript {
            id: script_id.clone(),
            matches: config.matches.clone(),
            js: vec![ScriptSource { code }],
            run_at,
            world: Some(resolved.world),
            all_frames: resolved.all_frames,
            exclude_matches: resolved.exclude_matches,
        };

        match self.registry.register(vec![script]).await {
            Ok(()) => {
                debug!(script_id = %script_id, "Script registered");
            }
            Err(e) if e.is_duplicate_script_id() => {
                debug!(script_id = %script_id, "Script already held by engine");
            }
            Err(e) => {
                error!(script_id = %script_id, error = %e, "Script registration failed");
                return Err(Error::registration_failure(script_id, e.to_string()));
            }
        }

        self.table.lock().records.insert(key, script_id.clone());
        drop(guard);
        Ok(RegisterOutcome::Registered(script_id))
    }

    /// Unregisters everything belonging to a configuration.
    ///
    /// Ids come from the table and, when `config` is given, from the
    /// deterministic derivation over its JS items, so this works after a
    /// restart emptied the table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Engine`] if the engine fails for a reason other
    /// than an unknown id.
    pub async fn unregister_for_config(
        &self,
        config_id: &ConfigId,
        config: Option<&Configuration>,
    ) -> Result<Vec<ScriptId>> {
        let mut ids: Vec<ScriptId> = {
            let mut table = self.table.lock();
            let keys: Vec<_> = table
                .records
                .keys()
                .filter(|key| &key.config_id == config_id)
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|key| table.records.remove(key))
                .collect()
        };

        if let Some(config) = config {
            for identity in config.js_identities() {
                let id = script_engine_id(config_id, &identity);
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }

        self.unregister_ids(ids.clone()).await?;
        debug!(config_id = %config_id, count = ids.len(), "Scripts unregistered");
        Ok(ids)
    }

    /// Forgets every record without touching the engine.
    pub fn reset(&self) -> Vec<ScriptId> {
        let mut table = self.table.lock();
        table.pending.clear();
        table.records.drain().map(|(_, id)| id).collect()
    }

    /// Full rebuild: unregister everything tracked or derivable from
    /// `previous`, clear the table, register `desired`.
    ///
    /// Individual registration failures are collected, not propagated.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the unregister phase fails.
    pub async fn reconcile_all(
        &self,
        previous: &[Configuration],
        desired: Vec<DesiredScript>,
    ) -> Result<ReconcileReport> {
        let mut ids = self.reset();
        for config in previous {
            let Some(config_id) = &config.id else { continue };
            for identity in config.js_identities() {
                let id = script_engine_id(config_id, &identity);
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }

        let mut report = ReconcileReport {
            unregistered: ids.len(),
            ..ReconcileReport::default()
        };
        self.unregister_ids(ids).await?;

        for script in desired {
            let run_at = JsOptions::resolve(&script.item.options, script.config.js_default.as_ref()).run_at;
            match self
                .register(&script.config, &script.item, script.code, run_at)
                .await
            {
                Ok(RegisterOutcome::Registered(_)) => report.registered += 1,
                Ok(RegisterOutcome::Skipped) => report.skipped += 1,
                Ok(RegisterOutcome::AlreadyActive) => {}
                Err(e) => report.failed.push(e),
            }
        }

        info!(
            unregistered = report.unregistered,
            registered = report.registered,
            failed = report.failed.len(),
            "Registrations rebuilt"
        );
        Ok(report)
    }

    /// Bulk unregister, falling back to one call per id when the engine
    /// rejects the batch over an unknown id.
    async fn unregister_ids(&self, ids: Vec<ScriptId>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        match self.registry.unregister(ids.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_nonexistent_script_id() => {
                debug!(count = ids.len(), "Batch unregister hit unknown id, retrying singly");
            }
            Err(e) => {
                warn!(error = %e, "Unregister failed");
                return Err(e);
            }
        }

        for id in ids {
            match self.registry.unregister(vec![id.clone()]).await {
                Ok(()) => {}
                Err(e) if e.is_nonexistent_script_id() => {}
                Err(e) => {
                    warn!(script_id = %id, error = %e, "Unregister failed");
                    return Err(e);
                }
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

    use std::time::Duration;

    use crate::config::Item;
    use crate::engine::MemoryUserScripts;

    fn config() -> Configuration {
        let mut config = Configuration::new("demo")
            .with_match("*://example.com/*")
            .with_js(Item::file("main.js"))
            .with_js(Item::inline("console.log(1)"));
        config.id = Some(ConfigId::new("demo-id"));
        config
    }

    fn reconciler(engine: &Arc<MemoryUserScripts>) -> Reconciler {
        Reconciler::new(engine.clone())
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let engine = Arc::new(MemoryUserScripts::new());
        let reconciler = reconciler(&engine);
        let config = config();
        let item = &config.js[0];

        let first = reconciler
            .register(&config, item, "main()".into(), RunAt::DocumentIdle)
            .await
            .expect("register");
        let second = reconciler
            .register(&config, item, "main()".into(), RunAt::DocumentIdle)
            .await
            .expect("register");

        assert_eq!(first, RegisterOutcome::Registered(ScriptId::new("usersite_demo_id_main_js")));
        assert_eq!(second, RegisterOutcome::AlreadyActive);
        assert_eq!(engine.register_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_registrations_collapse() {
        let engine = Arc::new(MemoryUserScripts::new().with_latency(Duration::from_millis(20)));
        let reconciler = reconciler(&engine);
        let config = config();
        let item = &config.js[0];

        let (a, b) = tokio::join!(
            reconciler.register(&config, item, "main()".into(), RunAt::DocumentIdle),
            reconciler.register(&config, item, "main()".into(), RunAt::DocumentIdle),
        );

        let outcomes = [a.expect("first"), b.expect("second")];
        assert!(outcomes.contains(&RegisterOutcome::AlreadyActive));
        assert_eq!(engine.register_calls(), 1);
        assert_eq!(engine.scripts().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_after_restart_is_success() {
        let engine = Arc::new(MemoryUserScripts::new());
        let config = config();
        let item = &config.js[0];

        reconciler(&engine)
            .register(&config, item, "main()".into(), RunAt::DocumentIdle)
            .await
            .expect("register");

        let restarted = reconciler(&engine);
        let outcome = restarted
            .register(&config, item, "main()".into(), RunAt::DocumentIdle)
            .await
            .expect("register after restart");

        assert!(matches!(outcome, RegisterOutcome::Registered(_)));
        let key = RegistrationKey::for_item(&ConfigId::new("demo-id"), item);
        assert!(matches!(restarted.state(&key), RegistrationState::Registered(_)));
        assert_eq!(engine.scripts().len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_returns_to_unregistered() {
        let engine = Arc::new(MemoryUserScripts::new());
        let reconciler = reconciler(&engine);
        let config = config();
        let item = &config.js[0];
        engine.reject_next("Permission denied");

        let err = reconciler
            .register(&config, item, "main()".into(), RunAt::DocumentIdle)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RegistrationFailure { .. }));

        let key = RegistrationKey::for_item(&ConfigId::new("demo-id"), item);
        assert_eq!(reconciler.state(&key), RegistrationState::Unregistered);

        reconciler
            .register(&config, item, "main()".into(), RunAt::DocumentIdle)
            .await
            .expect("retry");
    }

    #[tokio::test]
    async fn test_payload_fields() {
        let engine = Arc::new(MemoryUserScripts::new());
        let reconciler = reconciler(&engine);
        let config = config();

        reconciler
            .register(&config, &config.js[0], "main()".into(), RunAt::DocumentStart)
            .await
            .expect("register");

        let script = &engine.scripts()[0];
        assert_eq!(script.matches, vec!["*://example.com/*".to_string()]);
        assert_eq!(script.js[0].code, "main()");
        assert_eq!(script.run_at, RunAt::DocumentStart);
        assert_eq!(script.world, Some(crate::config::World::Main));
    }

    #[tokio::test]
    async fn test_empty_matches_skipped() {
        let engine = Arc::new(MemoryUserScripts::new());
        let reconciler = reconciler(&engine);
        let mut config = config();
        config.matches.clear();

        let outcome = reconciler
            .register(&config, &config.js[0], "main()".into(), RunAt::DocumentIdle)
            .await
            .expect("register");

        assert_eq!(outcome, RegisterOutcome::Skipped);
        assert_eq!(engine.register_calls(), 0);
    }

    #[tokio::test]
    async fn test_unregister_after_restart() {
        let engine = Arc::new(MemoryUserScripts::new());
        let config = config();

        let before = reconciler(&engine);
        for item in &config.js {
            before
                .register(&config, item, "x".into(), RunAt::DocumentIdle)
                .await
                .expect("register");
        }
        assert_eq!(engine.scripts().len(), 2);

        let restarted = reconciler(&engine);
        let removed = restarted
            .unregister_for_config(&ConfigId::new("demo-id"), Some(&config))
            .await
            .expect("unregister");

        assert_eq!(removed.len(), 2);
        assert!(engine.scripts().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_tolerates_missing_ids() {
        let engine = Arc::new(MemoryUserScripts::new());
        let reconciler = reconciler(&engine);
        let config = config();

        reconciler
            .register(&config, &config.js[0], "x".into(), RunAt::DocumentIdle)
            .await
            .expect("register");

        reconciler
            .unregister_for_config(&ConfigId::new("demo-id"), Some(&config))
            .await
            .expect("unregister");
        reconciler
            .unregister_for_config(&ConfigId::new("demo-id"), Some(&config))
            .await
            .expect("unregister again");

        assert!(engine.scripts().is_empty());
        assert!(reconciler.tracked().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_all_rebuilds() {
        let engine = Arc::new(MemoryUserScripts::new());
        let reconciler = reconciler(&engine);
        let old = config();

        reconciler
            .register(&old, &old.js[0], "old".into(), RunAt::DocumentIdle)
            .await
            .expect("register");

        let mut fresh = Configuration::new("other")
            .with_match("*://other.org/*")
            .with_js(Item::file("app.js"));
        fresh.id = Some(ConfigId::new("other"));

        let report = reconciler
            .reconcile_all(
                &[old],
                vec![DesiredScript {
                    item: fresh.js[0].clone(),
                    config: fresh,
                    code: "app()".into(),
                }],
            )
            .await
            .expect("reconcile");

        assert_eq!(report.registered, 1);
        assert!(report.failed.is_empty());
        assert_eq!(engine.ids(), vec![ScriptId::new("usersite_other_app_js")]);
    }
}
