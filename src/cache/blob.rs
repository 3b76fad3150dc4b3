//! Origin-private blob storage.

// ============================================================================
// Imports
// ============================================================================

use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

// ============================================================================
// BlobStore
// ============================================================================

/// Namespaced blob storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes a whole blob, replacing any previous one.
    async fn write(&self, namespace: &str, name: &str, bytes: Vec<u8>) -> Result<()>;

    /// Reads a blob. `None` if never written or evicted.
    async fn read(&self, namespace: &str, name: &str) -> Result<Option<Vec<u8>>>;

    /// Removes a namespace and everything in it.
    async fn remove_namespace(&self, namespace: &str) -> Result<()>;
}

// ============================================================================
// MemoryBlobStore
// ============================================================================

/// Blob store held in memory.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<FxHashMap<(String, String), Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn write(&self, namespace: &str, name: &str, bytes: Vec<u8>) -> Result<()> {
        self.blobs
            .write()
            .insert((namespace.to_string(), name.to_string()), bytes);
        Ok(())
    }

    async fn read(&self, namespace: &str, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn remove_namespace(&self, namespace: &str) -> Result<()> {
        self.blobs.write().retain(|(ns, _), _| ns != namespace);
        Ok(())
    }
}

// ============================================================================
// DirBlobStore
// ============================================================================

/// Blob store rooted in a directory: `<root>/<namespace>/<name>`.
///
/// Namespaces and names must already be filesystem-safe.
#[derive(Debug, Clone)]
pub struct DirBlobStore {
    root: PathBuf,
}

impl DirBlobStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for DirBlobStore {
    async fn write(&self, namespace: &str, name: &str, bytes: Vec<u8>) -> Result<()> {
        let dir = self.root.join(namespace);
        tokio::fs::create_dir_all(&dir).await?;
        let target = dir.join(name);

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut file = NamedTempFile::new_in(&dir)?;
            file.write_all(&bytes)?;
            file.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::storage(name, e.to_string()))??;

        Ok(())
    }

    async fn read(&self, namespace: &str, name: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.root.join(namespace).join(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_namespace(&self, namespace: &str) -> Result<()> {
        match tokio::fs::remove_dir_all(self.root.join(namespace)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_namespaces_are_isolated() {
        let store = MemoryBlobStore::new();
        store.write("a", "x", b"1".to_vec()).await.expect("write");
        store.write("b", "x", b"2".to_vec()).await.expect("write");

        store.remove_namespace("a").await.expect("remove");
        assert_eq!(store.read("a", "x").await.expect("read"), None);
        assert_eq!(store.read("b", "x").await.expect("read"), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_dir_store_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DirBlobStore::new(dir.path());

        assert_eq!(store.read("cfg", "cdn_1").await.expect("read"), None);
        store.write("cfg", "cdn_1", b"abc".to_vec()).await.expect("write");
        store.write("cfg", "cdn_1", b"xyz".to_vec()).await.expect("overwrite");
        assert_eq!(store.read("cfg", "cdn_1").await.expect("read"), Some(b"xyz".to_vec()));

        store.remove_namespace("cfg").await.expect("remove");
        store.remove_namespace("cfg").await.expect("remove again");
        assert_eq!(store.read("cfg", "cdn_1").await.expect("read"), None);
    }
}
