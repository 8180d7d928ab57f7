//! Domain types shared across the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a session discovers a whole site via sitemaps or ingests a single URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    SinglePage,
    WholeSite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// A single scrape job, owned exclusively by the orchestrator that created it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub url: String,
    pub mode: Mode,
    pub status: SessionStatus,
    pub total_pages: usize,
    pub pages_scraped: usize,
    pub failures: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, url: impl Into<String>, mode: Mode) -> Self {
        let now = Utc::now();
        Session {
            session_id: session_id.into(),
            url: url.into(),
            mode,
            status: SessionStatus::Pending,
            total_pages: 0,
            pages_scraped: 0,
            failures: 0,
            created_at: now,
            updated_at: now,
            duration_seconds: None,
            error_message: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One scraped page after fetch, prior to normalization.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub url: String,
    pub domain: String,
    pub title: String,
    pub markdown: String,
    pub fetched_at: DateTime<Utc>,
}

/// The unit stored in the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub domain: String,
    pub site_name: String,
    pub page_name: String,
    pub page_url: String,
    pub chunk_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn chunk_id(domain: &str, page_slug: &str, ordinal: usize) -> String {
        format!("{domain}/{page_slug}#{ordinal}")
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// A single search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    pub chunk_id: String,
    pub domain: String,
    pub site_name: String,
    pub page_name: String,
    pub page_url: String,
    pub chunk_text: String,
    pub score: f32,
}

/// A `(site_name, page_name, page_url, score)` reference emitted alongside a
/// synthesized answer, in the order first referenced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub site_name: String,
    pub page_name: String,
    pub page_url: String,
    pub score: f32,
}

/// A single turn of conversation history passed to `ask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}
