//! Configuration directories.
//!
//! A configuration directory holds a `config.json` descriptor next to the
//! files its items reference. Only top-level regular files are read;
//! subdirectories are ignored.
//!
//! ```text
//! demo/
//! ├── config.json
//! ├── main.js
//! └── style.css
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::storage::{DirectoryHandle, FileMap, encode_data_url, mime_for};

// ============================================================================
// Constants
// ============================================================================

/// Descriptor file name.
pub const CONFIG_FILE: &str = "config.json";

// ============================================================================
// LoadedDirectory
// ============================================================================

/// A configuration read from disk.
#[derive(Debug, Clone)]
pub struct LoadedDirectory {
    /// Parsed descriptor.
    pub config: Configuration,
    /// Every sibling file as a data URL.
    pub files: FileMap,
    /// Handle to re-read the directory later.
    pub handle: DirectoryHandle,
}

// ============================================================================
// Functions
// ============================================================================

/// Reads a configuration directory.
///
/// # Errors
///
/// - [`Error::NotFound`] if `config.json` is missing
/// - [`Error::Json`] if `config.json` is malformed
/// - [`Error::Io`] on read failures
pub async fn load_directory(path: &Path) -> Result<LoadedDirectory> {
    let mut config = None;
    let mut files = FileMap::new();

    for (name, file) in list_files(path).await? {
        let bytes = tokio::fs::read(&file).await?;
        if name == CONFIG_FILE {
            config = Some(serde_json::from_slice::<Configuration>(&bytes)?);
        } else {
            files.insert(name.clone(), encode_data_url(mime_for(&name), &bytes));
        }
    }

    let config = config.ok_or_else(|| {
        Error::not_found("Config file", path.join(CONFIG_FILE).display().to_string())
    })?;
    debug!(path = %path.display(), name = %config.name, files = files.len(), "Directory loaded");

    Ok(LoadedDirectory {
        config,
        files,
        handle: DirectoryHandle::new(path),
    })
}

/// Top-level regular files sorted by name.
async fn list_files(path: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut entries = tokio::fs::read_dir(path).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            debug!(path = %entry.path().display(), "Skipping non UTF-8 file name");
            continue;
        };
        files.push((name, entry.path()));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::storage::decode_data_url;

    #[tokio::test]
    async fn test_load_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"name":"demo","matches":"*://example.com/*","css":["style.css"]}"#,
        )
        .expect("config");
        std::fs::write(dir.path().join("style.css"), "body{color:red}").expect("css");
        std::fs::create_dir(dir.path().join("nested")).expect("dir");
        std::fs::write(dir.path().join("nested").join("skip.js"), "x").expect("nested");

        let loaded = load_directory(dir.path()).await.expect("load");
        assert_eq!(loaded.config.name, "demo");
        assert_eq!(loaded.config.matches, vec!["*://example.com/*".to_string()]);
        assert_eq!(loaded.files.len(), 1);
        assert!(loaded.files["style.css"].starts_with("data:text/css;base64,"));
        assert_eq!(decode_data_url(&loaded.files["style.css"]).expect("decode"), b"body{color:red}");
        assert_eq!(loaded.handle.path, dir.path());
    }

    #[tokio::test]
    async fn test_missing_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("main.js"), "x").expect("js");

        let err = load_directory(dir.path()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_malformed_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE), "{ not json").expect("config");

        assert!(matches!(load_directory(dir.path()).await, Err(Error::Json(_))));
    }
}
