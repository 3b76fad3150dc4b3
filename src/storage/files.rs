//! Per-configuration file maps and the data-URL codec.
//!
//! File blobs live apart from the configuration record, as a map from
//! file name to data URL (`data:text/css;base64,...`).

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;

use crate::error::{Error, Result};
use crate::identifiers::ConfigId;

use super::{KeyValueStore, StorageKeys};

// ============================================================================
// Types
// ============================================================================

/// File name to data URL.
pub type FileMap = BTreeMap<String, String>;

// ============================================================================
// Data URL Codec
// ============================================================================

/// Encodes bytes as a base64 data URL.
#[must_use]
pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", Base64Standard.encode(bytes))
}

/// Decodes the payload of a data URL.
///
/// Handles both base64 and percent-encoded payloads.
///
/// # Errors
///
/// - [`Error::InvalidArgument`] if there is no `,` separator
/// - [`Error::Base64`] if a base64 payload is malformed
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>> {
    let (header, payload) = data_url
        .split_once(',')
        .ok_or_else(|| Error::invalid_argument("data URL has no payload separator"))?;

    if header.ends_with(";base64") {
        return Ok(Base64Standard.decode(payload.trim())?);
    }

    Ok(urlencoding::decode_binary(payload.as_bytes()).into_owned())
}

/// MIME type from a file extension.
#[must_use]
pub fn mime_for(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("js" | "mjs") => "text/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("html" | "htm") => "text/html",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// File Map Persistence
// ============================================================================

/// Loads a configuration's file map. Missing maps are empty.
///
/// # Errors
///
/// Returns the storage error, or [`Error::Json`] if the map is malformed.
pub async fn load_file_map(
    storage: &dyn KeyValueStore,
    keys: &StorageKeys,
    config_id: &ConfigId,
) -> Result<FileMap> {
    match storage.get(&keys.files(config_id)).await? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(FileMap::new()),
    }
}

/// Replaces a configuration's file map.
///
/// # Errors
///
/// Returns the storage error.
pub async fn save_file_map(
    storage: &dyn KeyValueStore,
    keys: &StorageKeys,
    config_id: &ConfigId,
    files: &FileMap,
) -> Result<()> {
    storage
        .set(&keys.files(config_id), serde_json::to_value(files)?)
        .await
}

/// Removes a configuration's file map.
///
/// # Errors
///
/// Returns the storage error.
pub async fn remove_file_map(
    storage: &dyn KeyValueStore,
    keys: &StorageKeys,
    config_id: &ConfigId,
) -> Result<()> {
    storage.remove(&keys.files(config_id)).await
}

// ============================================================================
// Tests
// ============================================================================
