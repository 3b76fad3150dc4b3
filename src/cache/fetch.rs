//! HTTP fetching for the asset cache.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Streamed response body, one chunk per item.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// Response head plus streamed body.
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,
    /// Status reason phrase.
    pub status_text: String,
    /// `Content-Length`, if the server sent one.
    pub content_length: Option<u64>,
    /// Body chunks.
    pub body: ByteStream,
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl FetchResponse {
    /// Returns `true` for 2xx statuses.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ============================================================================
// HttpFetch
// ============================================================================

/// Network fetch used by [`CacheFetcher`](super::CacheFetcher).
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Starts a GET request and returns once headers are available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fetch`] on network failure.
    async fn fetch(&self, url: &str) -> Result<FetchResponse>;
}

// ============================================================================
// MemoryFetch
// ============================================================================

/// A canned resource served by [`MemoryFetch`].
#[derive(Debug, Clone)]
struct Resource {
    status: u16,
    body: Vec<u8>,
    send_length: bool,
}

/// Serves canned responses from memory.
///
/// Bodies are streamed in fixed-size chunks. Unknown URLs fail like a
/// network error.
#[derive(Debug)]
pub struct MemoryFetch {
    resources: RwLock<FxHashMap<String, Resource>>,
    chunk_size: usize,
    requests: AtomicUsize,
}

impl Default for MemoryFetch {
    fn default() -> Self {
        Self {
            resources: RwLock::new(FxHashMap::default()),
            chunk_size: 4,
            requests: AtomicUsize::new(0),
        }
    }
}

impl MemoryFetch {
    /// Creates an empty fetcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `body` with status 200 and a `Content-Length`.
    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.insert(url, 200, body.into(), true);
    }

    /// Serves `body` with status 200 and no `Content-Length`.
    pub fn serve_unsized(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.insert(url, 200, body.into(), false);
    }

    /// Answers `url` with an error status.
    pub fn fail(&self, url: &str, status: u16) {
        self.insert(url, status, Vec::new(), true);
    }

    /// Number of fetches issued.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn insert(&self, url: &str, status: u16, body: Vec<u8>, send_length: bool) {
        self.resources.write().insert(
            url.to_string(),
            Resource {
                status,
                body,
                send_length,
            },
        );
    }
}

#[async_trait]
impl HttpFetch for MemoryFetch {
    async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let resource = self
            .resources
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::fetch(url, "NetworkError when attempting to fetch resource"))?;

        let chunks: Vec<Result<Vec<u8>>> = resource
            .body
            .chunks(self.chunk_size.max(1))
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();

        Ok(FetchResponse {
            status: resource.status,
            status_text: if resource.status == 200 { "OK" } else { "Error" }.to_string(),
            content_length: resource.send_length.then_some(resource.body.len() as u64),
            body: stream::iter(chunks).boxed(),
        })
    }
}

// ============================================================================
// ReqwestFetch
// ============================================================================

/// Fetcher backed by a `reqwest` client.
#[cfg(feature = "http")]
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl ReqwestFetch {
    /// Wraps an existing client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl HttpFetch for ReqwestFetch {
    async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::fetch(url, e.to_string()))?;

        let status = response.status();
        let content_length = response.content_length();
        let source = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| Error::fetch(source.clone(), e.to_string()))
            })
            .boxed();

        Ok(FetchResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            content_length,
            body,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_fetch_streams_chunks() {
        let fetch = MemoryFetch::new();
        fetch.serve("https://cdn/x.js", "0123456789");

        let response = fetch.fetch("https://cdn/x.js").await.expect("fetch");
        assert!(response.is_success());
        assert_eq!(response.content_length, Some(10));

        let chunks: Vec<_> = response.body.collect().await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(fetch.request_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_fetch_unknown_url() {
        let fetch = MemoryFetch::new();
        assert!(matches!(
            fetch.fetch("https://cdn/missing.js").await,
            Err(Error::Fetch { .. })
        ));
    }
}
