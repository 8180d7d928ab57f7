//! Frozen runtime configuration, resolved once from the environment.
//!
//! Mirrors the teacher's `RuntimeConfig`/`EventBusConfig` defaulting pattern:
//! `dotenvy::dotenv().ok()` followed by `std::env::var` lookups with documented
//! defaults. Unlike that pattern, a value that is *present but unparseable* is
//! rejected loudly instead of silently falling back — a misconfigured
//! deployment should fail at startup, not drift into wrong behavior.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// All tunables the core recognizes, with their documented defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage_base_path: PathBuf,
    pub browser_timeout: Duration,
    pub browser_wait_for: String,
    pub max_concurrent_browsers: usize,
    pub max_concurrent_extractions: usize,
    pub max_pages_per_site: usize,
    pub chunk_char_limit: usize,
    pub chunk_overlap: usize,
    pub default_top_k: usize,
    pub default_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_base_path: PathBuf::from("./data"),
            browser_timeout: Duration::from_secs(60),
            browser_wait_for: "networkidle".to_string(),
            max_concurrent_browsers: 3,
            max_concurrent_extractions: 5,
            max_pages_per_site: 1000,
            chunk_char_limit: 4000,
            chunk_overlap: 200,
            default_top_k: 10,
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Resolve configuration from `.env` (if present) and the process
    /// environment, falling back to defaults for absent keys.
    pub fn from_env() -> CoreResult<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();
        Ok(Config {
            storage_base_path: env_path("STORAGE_BASE_PATH", defaults.storage_base_path)?,
            browser_timeout: env_seconds("BROWSER_TIMEOUT", defaults.browser_timeout)?,
            browser_wait_for: env_string("BROWSER_WAIT_FOR", defaults.browser_wait_for)?,
            max_concurrent_browsers: env_parsed(
                "MAX_CONCURRENT_BROWSERS",
                defaults.max_concurrent_browsers,
            )?,
            max_concurrent_extractions: env_parsed(
                "MAX_CONCURRENT_EXTRACTIONS",
                defaults.max_concurrent_extractions,
            )?,
            max_pages_per_site: env_parsed("MAX_PAGES_PER_SITE", defaults.max_pages_per_site)?,
            chunk_char_limit: env_parsed("CHUNK_CHAR_LIMIT", defaults.chunk_char_limit)?,
            chunk_overlap: env_parsed("CHUNK_OVERLAP", defaults.chunk_overlap)?,
            default_top_k: env_parsed("DEFAULT_TOP_K", defaults.default_top_k)?,
            default_timeout: env_seconds("DEFAULT_TIMEOUT", defaults.default_timeout)?,
        })
    }
}

fn env_string(key: &str, default: String) -> CoreResult<String> {
    match std::env::var(key) {
        Ok(value) => Ok(value),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(std::env::VarError::NotUnicode(_)) => Err(CoreError::Config(format!(
            "{key} is set but is not valid unicode"
        ))),
    }
}

fn env_path(key: &str, default: PathBuf) -> CoreResult<PathBuf> {
    Ok(PathBuf::from(env_string(key, default.display().to_string())?))
}

fn env_parsed<T>(key: &str, default: T) -> CoreResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| CoreError::Config(format!("{key}={raw:?} is invalid: {e}"))),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(std::env::VarError::NotUnicode(_)) => Err(CoreError::Config(format!(
            "{key} is set but is not valid unicode"
        ))),
    }
}

fn env_seconds(key: &str, default: Duration) -> CoreResult<Duration> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| CoreError::Config(format!("{key}={raw:?} is invalid: {e}"))),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(std::env::VarError::NotUnicode(_)) => Err(CoreError::Config(format!(
            "{key} is set but is not valid unicode"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.max_concurrent_browsers, 3);
        assert_eq!(cfg.max_concurrent_extractions, 5);
        assert_eq!(cfg.max_pages_per_site, 1000);
        assert_eq!(cfg.chunk_char_limit, 4000);
        assert_eq!(cfg.chunk_overlap, 200);
        assert_eq!(cfg.default_top_k, 10);
        assert_eq!(cfg.default_timeout, Duration::from_secs(30));
    }

    #[test]
    fn rejects_unparseable_present_value() {
        std::env::set_var("CHUNK_CHAR_LIMIT", "not-a-number");
        let result = env_parsed::<usize>("CHUNK_CHAR_LIMIT", 4000);
        std::env::remove_var("CHUNK_CHAR_LIMIT");
        assert!(result.is_err());
    }
}
