//! Crate-wide error taxonomy.
//!
//! Every capability and pipeline stage returns `Result<_, CoreError>` (or a
//! narrower error where the contract restricts the failure set). Per-page
//! failures are absorbed by the orchestrator; the variants here exist so that
//! absorption is an explicit decision at the call site, not an accident of a
//! caught-all exception type.

use std::fmt;

#[cfg(feature = "diagnostics")]
use miette::Diagnostic;

/// Whether a fetch failure is worth a caller retrying later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Timeout, connection reset, 5xx — likely to succeed on retry.
    Transient,
    /// 4xx, malformed URL target, navigation abort — retrying won't help.
    Permanent,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Transient => write!(f, "transient"),
            FetchErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[cfg_attr(feature = "diagnostics", derive(Diagnostic))]
pub enum CoreError {
    #[error("invalid url: {0}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(loomrag::invalid_url)))]
    InvalidUrl(String),

    #[error("fetch error ({kind}): {message}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(loomrag::fetch_error)))]
    FetchError {
        kind: FetchErrorKind,
        message: String,
    },

    #[error("normalize error: {0}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(loomrag::normalize_error)))]
    NormalizeError(String),

    #[error("vector store unavailable: {0}")]
    #[cfg_attr(
        feature = "diagnostics",
        diagnostic(
            code(loomrag::vector_store_unavailable),
            help("check the backing store connection and retry")
        )
    )]
    VectorStoreUnavailable(String),

    #[error("llm unavailable: {0}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(loomrag::llm_unavailable)))]
    LlmUnavailable(String),

    #[error("not found: {0}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(loomrag::not_found)))]
    NotFound(String),

    #[error("cancelled")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(loomrag::cancelled)))]
    Cancelled,

    #[error("configuration error: {0}")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(loomrag::config_error)))]
    Config(String),

    #[error(transparent)]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(loomrag::io)))]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(loomrag::serde)))]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(loomrag::http)))]
    Http(#[from] reqwest::Error),
}

impl CoreError {
    pub fn fetch_transient(message: impl Into<String>) -> Self {
        CoreError::FetchError {
            kind: FetchErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn fetch_permanent(message: impl Into<String>) -> Self {
        CoreError::FetchError {
            kind: FetchErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// True for failures the orchestrator should absorb as a per-page failure
    /// rather than fail the whole session.
    pub fn is_page_local(&self) -> bool {
        matches!(
            self,
            CoreError::FetchError { .. } | CoreError::NormalizeError(_)
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
