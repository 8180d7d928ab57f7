//! Drives one scraping session end-to-end: discovery, bounded-concurrency
//! fetch, normalize, chunk, upsert, with per-page failure isolation and
//! cooperative cancellation (spec §4.6/§5).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tracing::{info, instrument, warn};
use url::Url;

use crate::capabilities::BrowserEngine;
use crate::chunker::{self, ChunkerConfig};
use crate::config::Config;
use crate::error::CoreError;
use crate::fetcher::Fetcher;
use crate::normalize;
use crate::session::events::{SessionEvent, SessionEventHub, SessionEventType};
use crate::session::{CleanedPage, SessionRequest, SessionStore};
use crate::sitemap::Discoverer;
use crate::stores::VectorStore;
use crate::types::{Mode, Session, SessionStatus};

/// Handle a caller can use to cooperatively cancel an in-flight session.
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        CancelHandle(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Orchestrator {
    fetcher: Arc<Fetcher>,
    discoverer: Arc<Discoverer>,
    vector_store: Arc<VectorStore>,
    session_store: Arc<SessionStore>,
    chunker_config: ChunkerConfig,
}

impl Orchestrator {
    pub fn new(
        browser: Arc<dyn BrowserEngine>,
        discoverer: Arc<Discoverer>,
        vector_store: Arc<VectorStore>,
        session_store: Arc<SessionStore>,
        config: &Config,
    ) -> Self {
        Orchestrator {
            fetcher: Arc::new(Fetcher::new(browser, config)),
            discoverer,
            vector_store,
            session_store,
            chunker_config: ChunkerConfig {
                chunk_char_limit: config.chunk_char_limit,
                chunk_overlap: config.chunk_overlap,
            },
        }
    }

    /// Runs a session to completion. Intended to be spawned by the
    /// composition root immediately after `start_session` persists the
    /// initial `pending` record.
    #[instrument(skip(self, hub, cancel), fields(session_id = %session_id))]
    pub async fn run(
        self: Arc<Self>,
        session_id: String,
        request: SessionRequest,
        hub: Arc<SessionEventHub>,
        cancel: CancelHandle,
        max_concurrent_extractions: usize,
    ) {
        hub.publish(SessionEvent::new(
            SessionEventType::SessionStarted,
            &session_id,
            serde_json::json!({ "url": request.url, "mode": request.mode }),
        ));

        let urls = match request.mode {
            Mode::SinglePage => vec![request.url.clone()],
            Mode::WholeSite => self.discoverer.discover(&request.url).await,
        };

        self.run_with_urls(session_id, request, urls, hub, cancel, max_concurrent_extractions)
            .await;
    }

    /// Runs a session against an already-resolved URL set, skipping
    /// `Discoverer` entirely. `run` is the discovery-driven entry point the
    /// composition root spawns; this split exists so the per-page
    /// concurrency/failure-isolation/cancellation machinery can be exercised
    /// against a known URL set independently of sitemap resolution.
    pub async fn run_with_urls(
        self: Arc<Self>,
        session_id: String,
        request: SessionRequest,
        urls: Vec<String>,
        hub: Arc<SessionEventHub>,
        cancel: CancelHandle,
        max_concurrent_extractions: usize,
    ) {
        let session = Arc::new(Mutex::new(Session::new(
            session_id.clone(),
            request.url.clone(),
            request.mode,
        )));

        {
            let mut s = session.lock().await;
            s.status = SessionStatus::InProgress;
            s.touch();
            let _ = self.session_store.save_metadata(&s).await;
        }

        {
            let mut s = session.lock().await;
            s.total_pages = urls.len();
            s.touch();
            let _ = self.session_store.save_metadata(&s).await;
        }

        if urls.is_empty() {
            self.fail_session(&session, &hub, "discovery returned no urls").await;
            return;
        }

        let extraction_gate = Arc::new(Semaphore::new(max_concurrent_extractions.max(1)));
        let embedded_count = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::with_capacity(urls.len());

        for url in urls {
            let this = Arc::clone(&self);
            let session = Arc::clone(&session);
            let hub = Arc::clone(&hub);
            let cancel = cancel.clone();
            let gate = Arc::clone(&extraction_gate);
            let embedded_count = Arc::clone(&embedded_count);
            let session_id = session_id.clone();

            tasks.push(tokio::spawn(async move {
                let outcome = if cancel.is_cancelled() {
                    Err(CoreError::Cancelled)
                } else {
                    this.process_page(&session_id, &url, &gate, &cancel).await
                };
                match &outcome {
                    Ok(chunks_inserted) => {
                        if *chunks_inserted > 0 {
                            embedded_count.fetch_add(1, Ordering::SeqCst);
                        }
                        hub.publish(SessionEvent::new(
                            SessionEventType::PageEmbedded,
                            &session_id,
                            serde_json::json!({ "url": url, "chunks": chunks_inserted }),
                        ));

                        let mut s = session.lock().await;
                        s.pages_scraped += 1;
                        s.touch();
                        let _ = this.session_store.save_metadata(&s).await;
                    }
                    Err(err) => {
                        warn!(url = %url, error = %err, "page failed, continuing session");
                        hub.publish(SessionEvent::new(
                            SessionEventType::PageFailed,
                            &session_id,
                            serde_json::json!({ "url": url, "error": err.to_string() }),
                        ));

                        let mut s = session.lock().await;
                        s.failures += 1;
                        s.touch();
                        let _ = this.session_store.save_metadata(&s).await;
                    }
                }
            }));
        }

        for task in tasks {
            let _ = task.await;
        }

        if cancel.is_cancelled() {
            self.fail_session(&session, &hub, "cancelled").await;
            return;
        }

        let embedded = embedded_count.load(Ordering::SeqCst);
        let mut s = session.lock().await;
        let duration = (chrono::Utc::now() - s.created_at).num_milliseconds() as f64 / 1000.0;
        s.duration_seconds = Some(duration);
        s.touch();

        if embedded == 0 {
            s.status = SessionStatus::Failed;
            s.error_message = Some("no pages were successfully embedded".to_string());
            let _ = self.session_store.save_metadata(&s).await;
            hub.publish(SessionEvent::new(
                SessionEventType::SessionFailed,
                &session_id,
                serde_json::json!({ "error": s.error_message }),
            ));
        } else {
            s.status = SessionStatus::Completed;
            let _ = self.session_store.save_metadata(&s).await;
            hub.publish(SessionEvent::new(
                SessionEventType::SessionCompleted,
                &session_id,
                serde_json::json!({ "pages_scraped": s.pages_scraped, "total_pages": s.total_pages }),
            ));
        }
        info!(session_id = %session_id, status = ?s.status, "session finished");
    }

    async fn fail_session(
        &self,
        session: &Arc<Mutex<Session>>,
        hub: &Arc<SessionEventHub>,
        message: &str,
    ) {
        let mut s = session.lock().await;
        s.status = SessionStatus::Failed;
        s.error_message = Some(message.to_string());
        s.touch();
        let _ = self.session_store.save_metadata(&s).await;
        hub.publish(SessionEvent::new(
            SessionEventType::SessionFailed,
            &s.session_id,
            serde_json::json!({ "error": message }),
        ));
    }

    /// Fetch → normalize → chunk → upsert for one page. Returns the number
    /// of chunks inserted (0 is a valid, non-error outcome for a page whose
    /// content was entirely below the chunk minimum length).
    ///
    /// Rechecks `cancel` after the fetch suspension point: a page whose fetch
    /// was already in flight when cancellation was requested still completes
    /// its network call, but its chunks are never persisted.
    async fn process_page(
        &self,
        session_id: &str,
        url: &str,
        extraction_gate: &Arc<Semaphore>,
        cancel: &CancelHandle,
    ) -> Result<usize, CoreError> {
        let outcome = self.fetcher.fetch(url).await?;

        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let normalized = normalize::normalize(&outcome.html)?;
        if normalized.markdown.trim().is_empty() {
            return Err(CoreError::NormalizeError(format!(
                "{url} normalized to empty content"
            )));
        }

        let domain = Url::parse(&outcome.final_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string());

        self.session_store
            .append_cleaned_page(
                session_id,
                &domain,
                CleanedPage {
                    page_name: normalized.title.clone(),
                    page_url: outcome.final_url.clone(),
                    content: normalized.markdown.clone(),
                },
            )
            .await?;

        let texts = chunker::chunk(&normalized.markdown, &self.chunker_config);

        let _permit = extraction_gate
            .acquire()
            .await
            .map_err(|_| CoreError::VectorStoreUnavailable("extraction gate closed".into()))?;

        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let inserted = self
            .vector_store
            .upsert_chunks(&domain, &domain, &normalized.title, &outcome.final_url, texts)
            .await?;

        Ok(inserted)
    }
}
