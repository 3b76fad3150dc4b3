//! JSON-file storage backend.
//!
//! Each key is one `<key>.json` file under a root directory, the key
//! percent-encoded so distinct keys never share a file. Writes go to a
//! temporary file in the same directory and are renamed into place, so a
//! reader sees either the old or the new whole value.

// ============================================================================
// Imports
// ============================================================================

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};

use super::KeyValueStore;

// ============================================================================
// JsonFileStorage
// ============================================================================

/// Storage persisted as JSON files in a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    root: PathBuf,
}

impl JsonFileStorage {
    /// Opens (and creates if needed) a storage directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Opened JSON file storage");
        Ok(Self { root })
    }

    /// Returns the storage directory.
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", urlencoding::encode(key)))
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage(key, e.to_string())),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let bytes = serde_json::to_vec(&value)?;
        let root = self.root.clone();
        let target = self.path_for(key);

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut file = NamedTempFile::new_in(root)?;
            file.write_all(&bytes)?;
            file.flush()?;
            file.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::storage(key, e.to_string()))?
        .map_err(|e| Error::storage(key, e.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(key, e.to_string())),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::identifiers::ConfigId;
    use crate::storage::{FileMap, StorageKeys, load_file_map, remove_file_map, save_file_map};

    #[tokio::test]
    async fn test_round_trip_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = JsonFileStorage::open(dir.path()).await.expect("open");

        storage
            .set("usersite_configs", json!([["a", {"name": "a"}]]))
            .await
            .expect("set");

        let reopened = JsonFileStorage::open(dir.path()).await.expect("reopen");
        assert_eq!(
            reopened.get("usersite_configs").await.expect("get"),
            Some(json!([["a", {"name": "a"}]]))
        );
    }

    #[tokio::test]
    async fn test_missing_key_and_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = JsonFileStorage::open(dir.path().join("nested")).await.expect("open");

        assert_eq!(storage.get("nope").await.expect("get"), None);
        storage.set("k", json!(1)).await.expect("set");
        storage.remove("k").await.expect("remove");
        storage.remove("k").await.expect("remove again");
        assert_eq!(storage.get("k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_keys_differing_in_punctuation_keep_separate_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = JsonFileStorage::open(dir.path()).await.expect("open");
        let keys = StorageKeys::default();
        let dotted = ConfigId::new("site.v2");
        let underscored = ConfigId::new("site_v2");

        let mut a = FileMap::new();
        a.insert("a.css".into(), "data:text/css;base64,YQ==".into());
        let mut b = FileMap::new();
        b.insert("b.css".into(), "data:text/css;base64,Yg==".into());

        save_file_map(&storage, &keys, &dotted, &a).await.expect("save a");
        save_file_map(&storage, &keys, &underscored, &b).await.expect("save b");
        assert_eq!(load_file_map(&storage, &keys, &dotted).await.expect("load a"), a);
        assert_eq!(load_file_map(&storage, &keys, &underscored).await.expect("load b"), b);

        remove_file_map(&storage, &keys, &underscored).await.expect("remove b");
        assert_eq!(load_file_map(&storage, &keys, &dotted).await.expect("load a"), a);
    }

    #[tokio::test]
    async fn test_non_ascii_keys_do_not_collide() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = JsonFileStorage::open(dir.path()).await.expect("open");

        storage.set("usersite_files_café", json!(1)).await.expect("set");
        storage.set("usersite_files_日本", json!(2)).await.expect("set");

        assert_eq!(storage.get("usersite_files_café").await.expect("get"), Some(json!(1)));
        assert_eq!(storage.get("usersite_files_日本").await.expect("get"), Some(json!(2)));
        assert_eq!(storage.get("usersite_files_").await.expect("get"), None);
    }
}
