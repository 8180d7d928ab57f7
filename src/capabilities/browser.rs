use async_trait::async_trait;

use crate::error::CoreResult;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout_seconds: u64,
    pub wait_for: String,
}

/// Result of rendering a URL: the raw HTML, the URL after redirects, and the
/// HTTP-ish status code the engine observed.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub html: String,
    pub final_url: String,
    pub status: u16,
}

/// A headless-browser (or equivalent) rendering capability.
///
/// Implementations must be safe for concurrent invocation; the `Fetcher`
/// bounds concurrency externally via a semaphore, so this trait itself need
/// not serialize calls.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn fetch(&self, url: &str, opts: &FetchOptions) -> CoreResult<FetchOutcome>;
}
