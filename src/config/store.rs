//! Configuration store backed by durable key-value storage.
//!
//! The in-memory table keeps insertion order (the persisted format is an
//! ordered array of `[configId, config]` pairs) so URL matching returns
//! the first enabled configuration that was added.
//!
//! Writes are whole-value: every mutation re-serializes the full table
//! under `<namespace>_configs`. A failed write rolls the in-memory table
//! back and surfaces [`Error::Storage`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::background::TabHost;
use crate::error::{Error, Result};
use crate::identifiers::{ConfigId, TabId};
use crate::storage::{KeyValueStore, StorageKeys};

use super::model::{Configuration, ValidationMode};

// ============================================================================
// ConfigStore
// ============================================================================

/// In-memory configuration table with durable persistence.
pub struct ConfigStore {
    /// Durable backend.
    storage: Arc<dyn KeyValueStore>,
    /// Key layout.
    keys: StorageKeys,
    /// Validation applied on add.
    validation: ValidationMode,
    /// Entries in insertion order.
    entries: Vec<(ConfigId, Configuration)>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("namespace", &self.keys.namespace())
            .field("validation", &self.validation)
            .field("len", &self.entries.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConfigStore - Constructor
// ============================================================================

impl ConfigStore {
    /// Creates an empty store. Call [`load_all`](Self::load_all) to populate.
    #[must_use]
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        keys: StorageKeys,
        validation: ValidationMode,
    ) -> Self {
        Self {
            storage,
            keys,
            validation,
            entries: Vec::new(),
        }
    }
}

// ============================================================================
// ConfigStore - Persistence
// ============================================================================

impl ConfigStore {
    /// Replaces the table with the persisted one.
    ///
    /// Fails open: a read or decode failure is logged and leaves the table
    /// empty.
    pub async fn load_all(&mut self) {
        let key = self.keys.configs();

        let loaded = match self.storage.get(&key).await {
            Ok(Some(value)) => match serde_json::from_value::<Vec<(ConfigId, Configuration)>>(value)
            {
                Ok(entries) => entries,
                Err(e) => {
                    error!(key = %key, error = %e, "Error decoding configs");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                error!(key = %key, error = %e, "Error loading configs");
                Vec::new()
            }
        };

        self.entries = loaded;
        info!(count = self.entries.len(), "Configs loaded");
    }

    /// Writes the whole table.
    async fn save_all(&self) -> Result<()> {
        let key = self.keys.configs();
        let value: Value = serde_json::to_value(&self.entries)?;

        self.storage.set(&key, value).await.inspect_err(|e| {
            error!(key = %key, error = %e, "Error saving configs");
        })
    }

    /// Persists, restoring `snapshot` if the write fails.
    async fn commit(&mut self, snapshot: Vec<(ConfigId, Configuration)>) -> Result<()> {
        if let Err(e) = self.save_all().await {
            self.entries = snapshot;
            return Err(e);
        }
        Ok(())
    }
}

// ============================================================================
// ConfigStore - Commands
// ============================================================================

impl ConfigStore {
    /// Adds or overwrites a configuration.
    ///
    /// Sets `id` and defaults `enabled` to `true`. Re-adding an existing id
    /// keeps its position.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if validation fails (nothing persisted)
    /// - [`Error::Storage`] if the write fails (table rolled back)
    pub async fn add(&mut self, id: ConfigId, mut config: Configuration) -> Result<Configuration> {
        config.validate(self.validation)?;

        config.id = Some(id.clone());
        config.enabled.get_or_insert(true);

        let snapshot = self.entries.clone();
        match self.position(&id) {
            Some(index) => self.entries[index].1 = config.clone(),
            None => self.entries.push((id.clone(), config.clone())),
        }
        self.commit(snapshot).await?;

        debug!(config_id = %id, enabled = config.is_enabled(), "Config added");
        Ok(config)
    }

    /// Sets the enabled flag. Returns `false` if the id is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the write fails.
    pub async fn toggle(&mut self, id: &ConfigId, enabled: bool) -> Result<bool> {
        let Some(index) = self.position(id) else {
            warn!(config_id = %id, "Toggle for unknown config ignored");
            return Ok(false);
        };

        let snapshot = self.entries.clone();
        self.entries[index].1.enabled = Some(enabled);
        self.commit(snapshot).await?;

        debug!(config_id = %id, enabled, "Config toggled");
        Ok(true)
    }

    /// Removes a configuration and returns it.
    ///
    /// Registrations, blobs and cache entries are the caller's concern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the write fails.
    pub async fn delete(&mut self, id: &ConfigId) -> Result<Option<Configuration>> {
        let snapshot = self.entries.clone();
        let removed = self
            .position(id)
            .map(|index| self.entries.remove(index).1);
        self.commit(snapshot).await?;

        debug!(config_id = %id, existed = removed.is_some(), "Config deleted");
        Ok(removed)
    }
}

// ============================================================================
// ConfigStore - Queries
// ============================================================================

impl ConfigStore {
    /// Returns a configuration by id.
    #[must_use]
    pub fn get(&self, id: &ConfigId) -> Option<&Configuration> {
        self.position(id).map(|index| &self.entries[index].1)
    }

    /// Returns every configuration.
    #[must_use]
    pub fn get_all(&self) -> Vec<Configuration> {
        self.entries.iter().map(|(_, config)| config.clone()).collect()
    }

    /// Number of configurations.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First enabled configuration whose patterns match `url`.
    #[must_use]
    pub fn match_for_url(&self, url: &str) -> Option<&Configuration> {
        self.entries
            .iter()
            .map(|(_, config)| config)
            .find(|config| config.is_enabled() && config.matches_url(url))
    }

    /// First enabled configuration matching the tab's current URL.
    ///
    /// # Errors
    ///
    /// Returns the tab host's error if the tab lookup fails.
    pub async fn match_for_tab(
        &self,
        tabs: &dyn TabHost,
        tab_id: TabId,
    ) -> Result<Option<&Configuration>> {
        let Some(tab) = tabs.get(tab_id).await? else {
            return Err(Error::not_found("Tab", tab_id.to_string()));
        };
        Ok(self.match_for_url(&tab.url))
    }

    fn position(&self, id: &ConfigId) -> Option<usize> {
        self.entries.iter().position(|(key, _)| key == id)
    }
}

// ============================================================================
// Tests
// ============================================================================
