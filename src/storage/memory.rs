//! In-process storage backend.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::{Error, Result};

use super::KeyValueStore;

// ============================================================================
// MemoryStorage
// ============================================================================

/// Key-value storage held in memory.
///
/// Shared between contexts by wrapping in an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: RwLock<FxHashMap<String, Value>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail, as a full quota would.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::storage(key, "QUOTA_BYTES quota exceeded"));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.check_writable(key)?;
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_writable(key)?;
        self.values.write().remove(key);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_remove() {
        let storage = MemoryStorage::new();
        storage.set("k", json!([1, 2])).await.expect("set");
        assert_eq!(storage.get("k").await.expect("get"), Some(json!([1, 2])));

        storage.remove("k").await.expect("remove");
        assert_eq!(storage.get("k").await.expect("get"), None);
        storage.remove("k").await.expect("remove missing");
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let storage = MemoryStorage::new();
        storage.fail_writes(true);
        assert!(storage.set("k", json!(1)).await.is_err());
        assert!(storage.is_empty());
    }
}
