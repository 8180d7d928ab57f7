//! Composition root: the single facade wiring every injected capability,
//! `Config`, the orchestrator, and the query pipeline into the stable
//! operations table from spec §6. Mirrors `weavegraph::app::App` as the one
//! place allowed to hold concrete capability types.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tracing::info;

use crate::capabilities::{BrowserEngine, Embedder, Reranker, LLM};
use crate::chunker::{self, ChunkerConfig};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::orchestrator::{CancelHandle, Orchestrator};
use crate::query::{AskParams, AskResult, QueryPipeline, SearchResult};
use crate::session::events::{SessionEventHub, SessionEventStream};
use crate::session::{SessionRequest, SessionStore};
use crate::sitemap::Discoverer;
use crate::stores::{Backend, HealthStatus, VectorStore};
use crate::types::{Mode, Session};

pub struct StartSessionResult {
    pub session_id: String,
    pub status: crate::types::SessionStatus,
}

pub struct EmbedSessionResult {
    pub total_pages: usize,
    pub total_chunks: usize,
    pub status: crate::types::SessionStatus,
}

/// `embed_session`'s `{session_id OR filename}` input: either the whole
/// session, or a single `cleaned_markdown/{domain}__{session_id}.json` file
/// named directly.
pub enum EmbedTarget {
    SessionId(String),
    Filename(String),
}

/// Splits a `{domain}__{session_id}.json` cleaned-markdown filename into its
/// `(domain, session_id)` parts. `session_id`s never contain `__`, so the
/// first occurrence is the separator.
fn parse_cleaned_markdown_filename(filename: &str) -> Option<(String, String)> {
    let stem = filename.strip_suffix(".json")?;
    let (domain, session_id) = stem.split_once("__")?;
    if domain.is_empty() || session_id.is_empty() {
        return None;
    }
    Some((domain.to_string(), session_id.to_string()))
}

/// Top-level entry point. Construct once per process via `Ops::new` (or the
/// lower-level `Ops::from_parts` when capabilities are already assembled)
/// and drive every operation through it.
pub struct Ops {
    config: Config,
    session_store: Arc<SessionStore>,
    orchestrator: Arc<Orchestrator>,
    vector_store: Arc<VectorStore>,
    query_pipeline: Arc<QueryPipeline>,
    hubs: SyncMutex<HashMap<String, Arc<SessionEventHub>>>,
    cancels: SyncMutex<HashMap<String, CancelHandle>>,
}

impl Ops {
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        config: Config,
        browser: Arc<dyn BrowserEngine>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LLM>,
        reranker: Option<Arc<dyn Reranker>>,
        backend: Arc<dyn Backend>,
        http_client: reqwest::Client,
    ) -> Self {
        let session_store = Arc::new(SessionStore::new(config.storage_base_path.clone()));
        let vector_store = Arc::new(VectorStore::new(backend, embedder));
        let discoverer = Arc::new(Discoverer::new(http_client, &config));
        let orchestrator = Arc::new(Orchestrator::new(
            browser,
            discoverer,
            Arc::clone(&vector_store),
            Arc::clone(&session_store),
            &config,
        ));
        let query_pipeline = Arc::new(QueryPipeline::new(
            Arc::clone(&vector_store),
            llm,
            reranker,
            &config,
        ));

        Ops {
            config,
            session_store,
            orchestrator,
            vector_store,
            query_pipeline,
            hubs: SyncMutex::new(HashMap::new()),
            cancels: SyncMutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `start_session` — validates the URL, persists a `pending` session
    /// record, and spawns the orchestrator run in the background.
    pub async fn start_session(
        &self,
        url: &str,
        mode: Mode,
        purpose: Option<String>,
    ) -> CoreResult<StartSessionResult> {
        crate::fetcher::reject_unsafe_target(url)?;

        let session_id = crate::session::generate_session_id();
        let session = Session::new(&session_id, url, mode);
        let request = SessionRequest {
            url: url.to_string(),
            mode,
            purpose,
        };
        self.session_store.create(&session, &request).await?;

        let hub = SessionEventHub::new();
        self.hubs.lock().insert(session_id.clone(), Arc::clone(&hub));
        let cancel = CancelHandle::new();
        self.cancels.lock().insert(session_id.clone(), cancel.clone());

        let orchestrator = Arc::clone(&self.orchestrator);
        let session_id_for_task = session_id.clone();
        let max_extractions = self.config.max_concurrent_extractions;
        tokio::spawn(async move {
            orchestrator
                .run(session_id_for_task, request, hub, cancel, max_extractions)
                .await;
        });

        info!(session_id = %session_id, "session started");
        Ok(StartSessionResult {
            session_id,
            status: crate::types::SessionStatus::Pending,
        })
    }

    pub async fn get_session(&self, session_id: &str) -> CoreResult<Session> {
        self.session_store.load_metadata(session_id).await
    }

    pub async fn list_sessions(&self) -> CoreResult<Vec<Session>> {
        self.session_store.list_sessions().await
    }

    pub async fn delete_session(&self, session_id: &str) -> CoreResult<()> {
        self.session_store.delete(session_id).await?;
        self.hubs.lock().remove(session_id);
        self.cancels.lock().remove(session_id);
        Ok(())
    }

    /// Cooperatively cancels an in-flight session. Not part of the stable
    /// operations table in §6 (which documents the observable read-side
    /// operations) but required to exercise the cancellation contract in
    /// §4.6/§5: in-flight fetches stop, chunks already inserted remain
    /// searchable, and the session ends `failed`.
    pub fn cancel_session(&self, session_id: &str) -> CoreResult<()> {
        match self.cancels.lock().get(session_id) {
            Some(handle) => {
                handle.cancel();
                Ok(())
            }
            None => Err(CoreError::NotFound(format!("session {session_id}"))),
        }
    }

    /// `embed_session` — re-chunks and re-embeds already persisted cleaned
    /// Markdown (e.g. after swapping the embedder), either for a whole
    /// session (`EmbedTarget::SessionId`) or for a single
    /// `cleaned_markdown/{domain}__{session_id}.json` file named directly
    /// (`EmbedTarget::Filename`), per the `{session_id OR filename}` input
    /// contract.
    pub async fn embed_session(&self, target: EmbedTarget) -> CoreResult<EmbedSessionResult> {
        match target {
            EmbedTarget::SessionId(session_id) => self.embed_session_by_id(&session_id).await,
            EmbedTarget::Filename(filename) => self.embed_session_by_filename(&filename).await,
        }
    }

    async fn embed_session_by_id(&self, session_id: &str) -> CoreResult<EmbedSessionResult> {
        let session = self.session_store.load_metadata(session_id).await?;
        let dir = self.session_store.session_dir(session_id).join("cleaned_markdown");

        let chunker_config = ChunkerConfig {
            chunk_char_limit: self.config.chunk_char_limit,
            chunk_overlap: self.config.chunk_overlap,
        };

        let mut total_chunks = 0usize;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => {
                return Ok(EmbedSessionResult {
                    total_pages: session.total_pages,
                    total_chunks: 0,
                    status: session.status,
                })
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            let bytes = tokio::fs::read(entry.path()).await?;
            let pages: Vec<crate::session::CleanedPage> = serde_json::from_slice(&bytes)?;
            let domain = entry
                .file_name()
                .to_string_lossy()
                .split("__")
                .next()
                .unwrap_or_default()
                .to_string();

            for page in pages {
                let texts = chunker::chunk(&page.content, &chunker_config);
                let inserted = self
                    .vector_store
                    .upsert_chunks(&domain, &domain, &page.page_name, &page.page_url, texts)
                    .await?;
                total_chunks += inserted;
            }
        }

        Ok(EmbedSessionResult {
            total_pages: session.total_pages,
            total_chunks,
            status: session.status,
        })
    }

    /// Re-embeds the single `{domain}__{session_id}.json` file named by
    /// `filename`, without touching the rest of that session's domains.
    async fn embed_session_by_filename(&self, filename: &str) -> CoreResult<EmbedSessionResult> {
        let (domain, session_id) = parse_cleaned_markdown_filename(filename)
            .ok_or_else(|| CoreError::NotFound(format!("cleaned markdown file {filename}")))?;

        let session = self.session_store.load_metadata(&session_id).await?;
        let path = self
            .session_store
            .session_dir(&session_id)
            .join("cleaned_markdown")
            .join(filename);

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| CoreError::NotFound(format!("cleaned markdown file {filename}")))?;
        let pages: Vec<crate::session::CleanedPage> = serde_json::from_slice(&bytes)?;

        let chunker_config = ChunkerConfig {
            chunk_char_limit: self.config.chunk_char_limit,
            chunk_overlap: self.config.chunk_overlap,
        };

        let mut total_chunks = 0usize;
        for page in pages {
            let texts = chunker::chunk(&page.content, &chunker_config);
            let inserted = self
                .vector_store
                .upsert_chunks(&domain, &domain, &page.page_name, &page.page_url, texts)
                .await?;
            total_chunks += inserted;
        }

        Ok(EmbedSessionResult {
            total_pages: session.total_pages,
            total_chunks,
            status: session.status,
        })
    }

    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter_domain: Option<&str>,
        filter_site: Option<&str>,
    ) -> CoreResult<SearchResult> {
        self.query_pipeline.search(query, top_k, filter_domain, filter_site).await
    }

    pub async fn ask(&self, question: &str, params: AskParams) -> CoreResult<AskResult> {
        self.query_pipeline.ask(question, params).await
    }

    pub async fn health(&self) -> CoreResult<HealthStatus> {
        self.vector_store.health().await
    }

    /// `subscribe_session` — returns a stream of lifecycle events until the
    /// session reaches a terminal state. Errs with `NotFound` if the session
    /// was never started in this process.
    pub fn subscribe_session(&self, session_id: &str) -> CoreResult<SessionEventStream> {
        self.hubs
            .lock()
            .get(session_id)
            .map(|hub| hub.subscribe())
            .ok_or_else(|| CoreError::NotFound(format!("session {session_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_domain_and_session_id_from_filename() {
        let parsed = parse_cleaned_markdown_filename("example.com__20260731T120000-ab12cd.json");
        assert_eq!(
            parsed,
            Some(("example.com".to_string(), "20260731T120000-ab12cd".to_string()))
        );
    }

    #[test]
    fn rejects_filename_without_separator() {
        assert!(parse_cleaned_markdown_filename("no-separator.json").is_none());
    }

    #[test]
    fn rejects_filename_without_json_suffix() {
        assert!(parse_cleaned_markdown_filename("example.com__sess-1").is_none());
    }
}
