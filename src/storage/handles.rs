//! Directory-handle records for filesystem-backed configurations.
//!
//! Kept apart from the key-value store: one record per configuration id,
//! pointing at the directory a rescan re-reads.

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::identifiers::ConfigId;

// ============================================================================
// DirectoryHandle
// ============================================================================

/// A granted directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryHandle {
    /// Directory display name.
    pub name: String,
    /// Directory location.
    pub path: PathBuf,
}

impl DirectoryHandle {
    /// Creates a handle named after the last path component.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { name, path }
    }
}

// ============================================================================
// HandleStore
// ============================================================================

/// Object store of directory handles keyed by configuration id.
#[async_trait]
pub trait HandleStore: Send + Sync {
    /// Records a handle, replacing any previous one.
    async fn save(&self, config_id: &ConfigId, handle: DirectoryHandle) -> Result<()>;

    /// Looks up a handle.
    async fn get(&self, config_id: &ConfigId) -> Result<Option<DirectoryHandle>>;

    /// Lists every record.
    async fn list(&self) -> Result<Vec<(ConfigId, DirectoryHandle)>>;

    /// Deletes a record. Deleting a missing record succeeds.
    async fn delete(&self, config_id: &ConfigId) -> Result<()>;
}

// ============================================================================
// MemoryHandleStore
// ============================================================================

/// Handle store held in memory.
#[derive(Debug, Default)]
pub struct MemoryHandleStore {
    handles: RwLock<FxHashMap<ConfigId, DirectoryHandle>>,
}

impl MemoryHandleStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HandleStore for MemoryHandleStore {
    async fn save(&self, config_id: &ConfigId, handle: DirectoryHandle) -> Result<()> {
        self.handles.write().insert(config_id.clone(), handle);
        Ok(())
    }

    async fn get(&self, config_id: &ConfigId) -> Result<Option<DirectoryHandle>> {
        Ok(self.handles.read().get(config_id).cloned())
    }

    async fn list(&self) -> Result<Vec<(ConfigId, DirectoryHandle)>> {
        let mut entries: Vec<_> = self
            .handles
            .read()
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn delete(&self, config_id: &ConfigId) -> Result<()> {
        self.handles.write().remove(config_id);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_name_from_path() {
        let handle = DirectoryHandle::new("/home/me/sites/demo");
        assert_eq!(handle.name, "demo");
    }

    #[tokio::test]
    async fn test_save_get_list_delete() {
        let store = MemoryHandleStore::new();
        let a = ConfigId::new("a");
        let b = ConfigId::new("b");

        store.save(&b, DirectoryHandle::new("/b")).await.expect("save");
        store.save(&a, DirectoryHandle::new("/a")).await.expect("save");

        assert_eq!(
            store.get(&a).await.expect("get").map(|h| h.path),
            Some(PathBuf::from("/a"))
        );

        let ids: Vec<_> = store.list().await.expect("list").into_iter().map(|e| e.0).collect();
        assert_eq!(ids, vec![a.clone(), b]);

        store.delete(&a).await.expect("delete");
        store.delete(&a).await.expect("delete again");
        assert!(store.get(&a).await.expect("get").is_none());
    }
}
