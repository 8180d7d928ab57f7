//! Resolves `robots.txt` and sitemap indexes into a deduplicated, same-domain
//! URL set for a whole-site job.

pub mod robots;
pub mod xml;

use std::collections::HashSet;
use std::sync::Arc;

use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;

const MAX_RECURSION_DEPTH: usize = 3;
const FALLBACK_SITEMAP_PATH: &str = "sitemap.xml";

pub struct Discoverer {
    client: Client,
    max_pages_per_site: usize,
}

impl Discoverer {
    pub fn new(client: Client, config: &Config) -> Self {
        Discoverer {
            client,
            max_pages_per_site: config.max_pages_per_site,
        }
    }

    /// Produces the ordered, deduplicated URL set to scrape for `seed_url`.
    ///
    /// Never fails: a missing or invalid robots.txt/sitemap is absorbed and
    /// the discoverer falls back to `[seed_url]`, per the spec's "no
    /// link-extraction crawling" decision on this open question.
    pub async fn discover(self: &Arc<Self>, seed_url: &str) -> Vec<String> {
        let seed = match Url::parse(seed_url) {
            Ok(url) => url,
            Err(_) => return vec![seed_url.to_string()],
        };

        let sitemap_urls = self.resolve_sitemap_urls(&seed).await;
        if sitemap_urls.is_empty() {
            warn!(url = %seed_url, "no sitemaps discovered; falling back to seed url only");
            return vec![seed_url.to_string()];
        }

        let mut visited_sitemaps = HashSet::new();
        let mut found = Vec::new();
        let mut seen = HashSet::new();
        let registrable_host = seed.host_str().unwrap_or_default().to_ascii_lowercase();

        for sitemap_url in sitemap_urls {
            self.process_sitemap(
                &sitemap_url,
                &registrable_host,
                0,
                &mut visited_sitemaps,
                &mut found,
                &mut seen,
            )
            .await;
            if found.len() >= self.max_pages_per_site {
                break;
            }
        }

        if found.is_empty() {
            return vec![seed_url.to_string()];
        }

        found.truncate(self.max_pages_per_site);
        found
    }

    async fn resolve_sitemap_urls(&self, seed: &Url) -> Vec<String> {
        let origin = origin_str(seed);
        let robots_url = format!("{origin}/robots.txt");

        if let Ok(body) = self.fetch_text(&robots_url).await {
            let directives = robots::extract_sitemap_directives(&body);
            if !directives.is_empty() {
                return directives;
            }
        }

        let candidate = format!("{origin}/{FALLBACK_SITEMAP_PATH}");
        if self.fetch_text(&candidate).await.is_ok() {
            return vec![candidate];
        }

        Vec::new()
    }

    fn process_sitemap<'a>(
        &'a self,
        sitemap_url: &'a str,
        registrable_host: &'a str,
        depth: usize,
        visited: &'a mut HashSet<String>,
        found: &'a mut Vec<String>,
        seen: &'a mut HashSet<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if depth > MAX_RECURSION_DEPTH {
                return;
            }
            if !visited.insert(sitemap_url.to_string()) {
                return;
            }
            if found.len() >= self.max_pages_per_site {
                return;
            }

            let body = match self.fetch_text(sitemap_url).await {
                Ok(body) => body,
                Err(err) => {
                    warn!(sitemap_url, error = %err, "failed to fetch sitemap; skipping");
                    return;
                }
            };

            let parsed = match xml::parse_sitemap_xml(&body) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(sitemap_url, error = %err, "failed to parse sitemap; skipping");
                    return;
                }
            };

            if parsed.is_index {
                for child in parsed.locations {
                    self.process_sitemap(&child, registrable_host, depth + 1, visited, found, seen)
                        .await;
                    if found.len() >= self.max_pages_per_site {
                        return;
                    }
                }
                return;
            }

            for loc in parsed.locations {
                if let Some(canonical) = canonicalize_same_domain(&loc, registrable_host) {
                    if seen.insert(canonical.clone()) {
                        found.push(canonical);
                        if found.len() >= self.max_pages_per_site {
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn fetch_text(&self, url: &str) -> Result<String, reqwest::Error> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let body = response.text().await?;
        debug!(url, bytes = body.len(), "fetched sitemap resource");
        Ok(body)
    }
}

/// `scheme://host[:port]` with no trailing slash, port included whenever it
/// isn't the scheme's default (`Url::host_str` alone drops it).
fn origin_str(url: &Url) -> String {
    match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), url.host_str().unwrap_or_default(), port),
        None => format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default()),
    }
}

/// Canonicalizes `raw_url` (lowercase scheme+host, strip fragment, strip
/// trailing slash unless path is "/") and filters to `registrable_host`.
fn canonicalize_same_domain(raw_url: &str, registrable_host: &str) -> Option<String> {
    let mut url = Url::parse(raw_url).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    if host != registrable_host {
        return None;
    }

    url.set_fragment(None);
    let scheme = url.scheme().to_ascii_lowercase();

    let mut path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }

    let mut canonical = match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}{path}"),
        None => format!("{scheme}://{host}{path}"),
    };
    if let Some(query) = url.query() {
        canonical.push('?');
        canonical.push_str(query);
    }
    Some(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_trailing_slash_and_case() {
        let canonical =
            canonicalize_same_domain("HTTPS://Example.com/about/", "example.com").unwrap();
        assert_eq!(canonical, "https://example.com/about");
    }

    #[test]
    fn keeps_root_slash() {
        let canonical = canonicalize_same_domain("https://example.com/", "example.com").unwrap();
        assert_eq!(canonical, "https://example.com/");
    }

    #[test]
    fn filters_other_domains() {
        assert!(canonicalize_same_domain("https://other.test/x", "example.com").is_none());
    }

    #[test]
    fn strips_fragment_keeps_query() {
        let canonical =
            canonicalize_same_domain("https://example.com/a?x=1#section", "example.com").unwrap();
        assert_eq!(canonical, "https://example.com/a?x=1");
    }

    #[tokio::test]
    async fn discover_follows_robots_txt_to_sitemap_urls() {
        let server = httpmock::MockServer::start();

        let robots = server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/robots.txt");
            then.status(200)
                .body(format!("User-agent: *\nSitemap: {}/sitemap.xml\n", server.base_url()));
        });
        let sitemap = server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/sitemap.xml");
            then.status(200).body(format!(
                r#"<?xml version="1.0"?><urlset><url><loc>{}/about</loc></url><url><loc>{}/about/</loc></url></urlset>"#,
                server.base_url(),
                server.base_url()
            ));
        });

        let config = Config::default();
        let discoverer = Arc::new(Discoverer::new(reqwest::Client::new(), &config));
        let urls = discoverer.discover(&server.base_url()).await;

        robots.assert();
        sitemap.assert();
        assert_eq!(urls, vec![format!("{}/about", server.base_url())]);
    }

    #[tokio::test]
    async fn discover_falls_back_to_seed_when_no_sitemap_found() {
        let server = httpmock::MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET);
            then.status(404);
        });

        let config = Config::default();
        let discoverer = Arc::new(Discoverer::new(reqwest::Client::new(), &config));
        let urls = discoverer.discover(&server.base_url()).await;

        assert_eq!(urls, vec![server.base_url()]);
    }
}
