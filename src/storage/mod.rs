//! Durable key-value storage primitives.
//!
//! The core only needs atomic whole-value `get`/`set`/`remove`; the
//! [`KeyValueStore`] trait is that surface. Concurrent writers of the same
//! key are last-writer-wins.
//!
//! # Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | `keys` | [`StorageKeys`] key layout per namespace |
//! | `memory` | [`MemoryStorage`] in-process backend |
//! | `file` | [`JsonFileStorage`] one JSON file per key |
//! | `files` | Per-config file maps and data-URL codec |
//! | `handles` | Directory-handle records for `fs` configurations |
//!
//! # Persisted Layout
//!
//! | Key | Value |
//! |-----|-------|
//! | `<ns>_configs` | `[[configId, config], ...]` |
//! | `<ns>_files_<configId>` | `{ fileName: dataUrl }` |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

mod file;
mod files;
mod handles;
mod keys;
mod memory;

// ============================================================================
// Re-exports
// ============================================================================

pub use file::JsonFileStorage;
pub use files::{
    FileMap, decode_data_url, encode_data_url, load_file_map, mime_for, remove_file_map,
    save_file_map,
};
pub use handles::{DirectoryHandle, HandleStore, MemoryHandleStore};
pub use keys::{DEFAULT_NAMESPACE, StorageKeys};
pub use memory::MemoryStorage;

// ============================================================================
// KeyValueStore
// ============================================================================

/// Whole-value durable storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a value.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Writes a value, replacing any previous one.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Removes a value. Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<()>;
}
