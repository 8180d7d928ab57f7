//! Wraps a pooled `BrowserEngine` with the scroll-to-bottom policy, a
//! concurrency bound, and defense-in-depth URL rejection.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::capabilities::{BrowserEngine, FetchOptions, FetchOutcome};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};

/// Fixed scroll increment policy applied before reading the DOM: scroll in
/// 2000px increments to the document end, then back to top, to trigger
/// lazy-loaded content. Browser engines that do not need this are free to
/// treat it as a no-op; it is expressed here as a marker so the contract is
/// visible to callers, not buried in an engine implementation.
#[derive(Debug, Clone, Copy)]
pub struct ScrollPolicy {
    pub increment_px: u32,
}

impl Default for ScrollPolicy {
    fn default() -> Self {
        ScrollPolicy { increment_px: 2000 }
    }
}

pub struct Fetcher {
    engine: Arc<dyn BrowserEngine>,
    pool: Arc<Semaphore>,
    timeout_seconds: u64,
    wait_for: String,
    scroll_policy: ScrollPolicy,
}

impl Fetcher {
    pub fn new(engine: Arc<dyn BrowserEngine>, config: &Config) -> Self {
        Fetcher {
            engine,
            pool: Arc::new(Semaphore::new(config.max_concurrent_browsers.max(1))),
            timeout_seconds: config.browser_timeout.as_secs(),
            wait_for: config.browser_wait_for.clone(),
            scroll_policy: ScrollPolicy::default(),
        }
    }

    pub fn scroll_policy(&self) -> ScrollPolicy {
        self.scroll_policy
    }

    /// Renders `url`, rejecting malformed input and localhost/private targets
    /// before acquiring a pool slot.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &str) -> CoreResult<FetchOutcome> {
        reject_unsafe_target(url)?;

        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| CoreError::fetch_permanent("browser pool closed"))?;

        let opts = FetchOptions {
            timeout_seconds: self.timeout_seconds,
            wait_for: self.wait_for.clone(),
        };

        let deadline = std::time::Duration::from_secs(self.timeout_seconds);
        match tokio::time::timeout(deadline, self.engine.fetch(url, &opts)).await {
            Ok(Ok(outcome)) => {
                debug!(final_url = %outcome.final_url, status = outcome.status, "fetch complete");
                Ok(outcome)
            }
            Ok(Err(err)) => {
                warn!(error = %err, "fetch failed");
                Err(err)
            }
            Err(_) => Err(CoreError::fetch_transient(format!(
                "fetch of {url} timed out after {}s",
                self.timeout_seconds
            ))),
        }
    }
}

/// Rejects malformed URLs and localhost/private-IP literals, independent of
/// the sitemap discoverer's same-domain filter.
pub fn reject_unsafe_target(url: &str) -> CoreResult<()> {
    let parsed = Url::parse(url).map_err(|e| CoreError::InvalidUrl(format!("{url}: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(CoreError::InvalidUrl(format!(
            "unsupported scheme in {url}"
        )));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| CoreError::InvalidUrl(format!("{url} has no host")))?;

    if host.eq_ignore_ascii_case("localhost") {
        return Err(CoreError::InvalidUrl(format!(
            "{url} targets localhost"
        )));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_or_loopback(&ip) {
            return Err(CoreError::InvalidUrl(format!(
                "{url} targets a private or loopback address"
            )));
        }
    }

    Ok(())
}

fn is_private_or_loopback(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}
