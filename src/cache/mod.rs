//! CDN asset cache.
//!
//! Remote assets are fetched once, on an explicit caching step, and stored
//! in an origin-private blob store under a per-configuration namespace.
//! Injection only ever reads the cache: a miss is an error, never a fetch.
//!
//! # Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | `blob` | [`BlobStore`] trait, memory and directory backends |
//! | `fetch` | [`HttpFetch`] trait and response stream |
//! | `fetcher` | [`CacheFetcher`] with progress reporting |

// ============================================================================
// Imports
// ============================================================================

use url::Url;

// ============================================================================
// Submodules
// ============================================================================

mod blob;
mod fetch;
mod fetcher;

// ============================================================================
// Re-exports
// ============================================================================

pub use blob::{BlobStore, DirBlobStore, MemoryBlobStore};
#[cfg(feature = "http")]
pub use fetch::ReqwestFetch;
pub use fetch::{ByteStream, FetchResponse, HttpFetch, MemoryFetch};
pub use fetcher::{CacheFetcher, Progress, cache_file_name, namespace_for};

// ============================================================================
// Functions
// ============================================================================

/// Returns `true` for absolute `http:`/`https:` URLs.
#[must_use]
pub fn is_http_url(value: &str) -> bool {
    Url::parse(value).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_http_url() {
        assert!(is_http_url("https://cdn.example.com/lib.js"));
        assert!(is_http_url("http://cdn.example.com/a.css"));
        assert!(!is_http_url("style.css"));
        assert!(!is_http_url("file:///etc/passwd"));
        assert!(!is_http_url("data:text/css,a{}"));
    }
}
