//! Fetch-and-store for remote assets.
//!
//! Cache file names are derived from the URL with a 32-bit rolling hash
//! over UTF-16 code units (`h = h * 31 + c`, wrapping), rendered as
//! `cdn_<base36(|h|)>`. Namespaces are the configuration id with every
//! character outside `[A-Za-z0-9_-]` replaced by `_`.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConfigId;

use super::{BlobStore, HttpFetch};

// ============================================================================
// Constants
// ============================================================================

/// Prefix of every cache file name.
const CACHE_FILE_PREFIX: &str = "cdn_";

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

// ============================================================================
// Naming
// ============================================================================

fn url_hash(url: &str) -> i32 {
    url.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    })
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Cache file name for a URL.
#[must_use]
pub fn cache_file_name(url: &str) -> String {
    let magnitude = i64::from(url_hash(url)).unsigned_abs();
    format!("{CACHE_FILE_PREFIX}{}", to_base36(magnitude))
}

/// Cache namespace for a configuration.
#[must_use]
pub fn namespace_for(config_id: &ConfigId) -> String {
    config_id
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ============================================================================
// Progress
// ============================================================================

/// Download progress for one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes received so far.
    pub received: u64,
    /// Total size, when the server announced one.
    pub total: Option<u64>,
    /// Percent complete, only when `total` is known and non-zero.
    pub percent: Option<u8>,
}

impl Progress {
    fn new(received: u64, total: Option<u64>) -> Self {
        let percent = total.filter(|t| *t > 0).map(|t| {
            let pct = (received.saturating_mul(100) + t / 2) / t;
            pct.min(100) as u8
        });
        Self {
            received,
            total,
            percent,
        }
    }
}

// ============================================================================
// CacheFetcher
// ============================================================================

/// Downloads assets into the blob store and reads them back.
#[derive(Clone)]
pub struct CacheFetcher {
    blobs: Arc<dyn BlobStore>,
    http: Arc<dyn HttpFetch>,
}

impl std::fmt::Debug for CacheFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheFetcher").finish_non_exhaustive()
    }
}

impl CacheFetcher {
    /// Creates a fetcher over a blob store and an HTTP client.
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobStore>, http: Arc<dyn HttpFetch>) -> Self {
        Self { blobs, http }
    }

    /// Fetches `url` and stores it under the configuration's namespace.
    ///
    /// `on_progress` is called after every received chunk. Nothing is
    /// written unless the whole body arrived.
    ///
    /// # Errors
    ///
    /// - [`Error::Fetch`] on network failure or a non-2xx status
    /// - the blob store error if the write fails
    pub async fn cache_url<F>(&self, config_id: &ConfigId, url: &str, mut on_progress: F) -> Result<String>
    where
        F: FnMut(Progress) + Send,
    {
        let response = self.http.fetch(url).await?;
        if !response.is_success() {
            warn!(config_id = %config_id, url, status = response.status, "Asset fetch rejected");
            return Err(Error::fetch(
                url,
                format!("Failed to fetch: {} {}", response.status, response.status_text),
            ));
        }

        let total = response.content_length;
        let mut body = response.body;
        let mut bytes = Vec::with_capacity(total.unwrap_or(0).min(1 << 20) as usize);

        while let Some(chunk) = body.next().await {
            bytes.extend_from_slice(&chunk?);
            on_progress(Progress::new(bytes.len() as u64, total));
        }

        let name = cache_file_name(url);
        self.blobs
            .write(&namespace_for(config_id), &name, bytes)
            .await?;

        debug!(config_id = %config_id, url, file = %name, "Asset cached");
        Ok(name)
    }

    /// Reads a cached asset as text. `None` on a miss.
    ///
    /// # Errors
    ///
    /// Returns the blob store error.
    pub async fn get_cached_content(&self, config_id: &ConfigId, url: &str) -> Result<Option<String>> {
        let bytes = self
            .blobs
            .read(&namespace_for(config_id), &cache_file_name(url))
            .await?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    /// Returns `true` if `url` is cached for the configuration.
    ///
    /// # Errors
    ///
    /// Returns the blob store error.
    pub async fn is_cached(&self, config_id: &ConfigId, url: &str) -> Result<bool> {
        Ok(self
            .blobs
            .read(&namespace_for(config_id), &cache_file_name(url))
            .await?
            .is_some())
    }

    /// Drops every cached asset of a configuration.
    ///
    /// # Errors
    ///
    /// Returns the blob store error.
    pub async fn clear_config_cache(&self, config_id: &ConfigId) -> Result<()> {
        self.blobs.remove_namespace(&namespace_for(config_id)).await?;
        debug!(config_id = %config_id, "Asset cache cleared");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cache::{MemoryBlobStore, MemoryFetch};

    const URL: &str = "https://cdn.example.com/lib.js";

    fn fetcher() -> (CacheFetcher, Arc<MemoryBlobStore>, Arc<MemoryFetch>) {
        let blobs = Arc::new(MemoryBlobStore::new());
        let http = Arc::new(MemoryFetch::new());
        (CacheFetcher::new(blobs.clone(), http.clone()), blobs, http)
    }

    #[test]
    fn test_cache_file_name() {
        assert_eq!(cache_file_name(""), "cdn_0");
        assert_eq!(cache_file_name("a"), "cdn_2p");
        assert_eq!(cache_file_name("ab"), "cdn_2e9");
        assert_eq!(cache_file_name(URL), cache_file_name(URL));
        assert!(cache_file_name(URL).starts_with("cdn_"));
    }

    #[test]
    fn test_namespace_for() {
        assert_eq!(namespace_for(&ConfigId::new("my site.v2")), "my_site_v2");
        assert_eq!(namespace_for(&ConfigId::new("a-b_c")), "a-b_c");
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(Progress::new(5, Some(10)).percent, Some(50));
        assert_eq!(Progress::new(10, Some(10)).percent, Some(100));
        assert_eq!(Progress::new(5, None).percent, None);
        assert_eq!(Progress::new(0, Some(0)).percent, None);
    }

    #[tokio::test]
    async fn test_cache_and_read_back() {
        let (fetcher, _, http) = fetcher();
        let id = ConfigId::new("demo");
        http.serve(URL, "console.log(1)");

        let mut seen = Vec::new();
        fetcher
            .cache_url(&id, URL, |p| seen.push(p.percent))
            .await
            .expect("cache");

        assert_eq!(seen.last(), Some(&Some(100)));
        assert_eq!(
            fetcher.get_cached_content(&id, URL).await.expect("read").as_deref(),
            Some("console.log(1)")
        );
    }

    #[tokio::test]
    async fn test_unsized_body_reports_no_percent() {
        let (fetcher, _, http) = fetcher();
        let id = ConfigId::new("demo");
        http.serve_unsized(URL, "0123456789");

        let mut seen = Vec::new();
        fetcher.cache_url(&id, URL, |p| seen.push(p)).await.expect("cache");

        assert!(seen.iter().all(|p| p.percent.is_none()));
        assert_eq!(seen.last().map(|p| p.received), Some(10));
    }

    #[tokio::test]
    async fn test_failed_fetch_writes_nothing() {
        let (fetcher, blobs, http) = fetcher();
        let id = ConfigId::new("demo");
        http.fail(URL, 404);

        let err = fetcher.cache_url(&id, URL, |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
        assert!(blobs.is_empty());
        assert!(!fetcher.is_cached(&id, URL).await.expect("read"));
    }

    #[tokio::test]
    async fn test_clear_config_cache() {
        let (fetcher, _, http) = fetcher();
        let a = ConfigId::new("a");
        let b = ConfigId::new("b");
        http.serve(URL, "x");
        fetcher.cache_url(&a, URL, |_| {}).await.expect("cache");
        fetcher.cache_url(&b, URL, |_| {}).await.expect("cache");

        fetcher.clear_config_cache(&a).await.expect("clear");

        assert!(!fetcher.is_cached(&a, URL).await.expect("read"));
        assert!(fetcher.is_cached(&b, URL).await.expect("read"));
    }
}
