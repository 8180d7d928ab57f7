//! In-memory fakes for every capability trait plus an in-memory `Backend`,
//! in the style of the corpus's `MockEmbeddingProvider` test fixtures:
//! deterministic, configurable to fail on demand, free of real I/O.
//!
//! Used by this crate's own unit/integration tests; also useful to
//! downstream crates wiring up their own pipeline tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::capabilities::{BrowserEngine, Embedder, FetchOptions, FetchOutcome, ModelTier, Reranker, LLM};
use crate::error::{CoreError, CoreResult};
use crate::stores::{Backend, ChunkRecord};
use crate::types::{ConversationTurn, Hit};

/// Serves canned HTML by exact URL match; fails with a transient
/// `FetchError` for any unconfigured URL.
#[derive(Default)]
pub struct FakeBrowserEngine {
    pages: Mutex<HashMap<String, String>>,
    fail_urls: Mutex<HashMap<String, String>>,
    delay: Mutex<Option<std::time::Duration>>,
}

impl FakeBrowserEngine {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_page(self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.lock().insert(url.into(), html.into());
        self
    }

    #[must_use]
    pub fn with_failure(self, url: impl Into<String>, message: impl Into<String>) -> Self {
        self.fail_urls.lock().insert(url.into(), message.into());
        self
    }

    /// Makes every `fetch` pause before resolving, so tests exercising
    /// cancellation mid-session have a window to call it.
    #[must_use]
    pub fn with_delay(self, delay: std::time::Duration) -> Self {
        *self.delay.lock() = Some(delay);
        self
    }
}

#[async_trait]
impl BrowserEngine for FakeBrowserEngine {
    async fn fetch(&self, url: &str, _opts: &FetchOptions) -> CoreResult<FetchOutcome> {
        if let Some(delay) = *self.delay.lock() {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.fail_urls.lock().get(url).cloned() {
            return Err(CoreError::fetch_transient(message));
        }
        match self.pages.lock().get(url).cloned() {
            Some(html) => Ok(FetchOutcome {
                html,
                final_url: url.to_string(),
                status: 200,
            }),
            None => Err(CoreError::fetch_permanent(format!("no fake page for {url}"))),
        }
    }
}

/// Deterministic, dependency-free embedder: hashes each word into one of
/// `dimension` buckets and L2-normalizes the resulting vector, so
/// semantically overlapping texts land closer together without pulling in a
/// real model.
pub struct FakeEmbedder {
    dimension: usize,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        FakeEmbedder { dimension }
    }
}

impl Default for FakeEmbedder {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_text(t, self.dimension)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn embed_text(text: &str, dimension: usize) -> Vec<f32> {
    let mut buckets = vec![0.0f32; dimension];
    for word in text.split_whitespace() {
        let bucket = simple_hash(word) as usize % dimension;
        buckets[bucket] += 1.0;
    }
    let norm = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for b in &mut buckets {
            *b /= norm;
        }
    }
    buckets
}

fn simple_hash(word: &str) -> u64 {
    let mut hash: u64 = 5381;
    for byte in word.as_bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(*byte as u64);
    }
    hash
}

/// Echoes its input back (joined messages, space-separated) instead of
/// calling a real model. Good enough to assert on keyword presence and to
/// exercise the rewrite-fallback and conversation-history-inclusion paths
/// without any network access.
pub struct FakeLLM {
    fail: bool,
}

impl FakeLLM {
    pub fn new() -> Self {
        FakeLLM { fail: false }
    }

    #[must_use]
    pub fn always_failing() -> Self {
        FakeLLM { fail: true }
    }
}

impl Default for FakeLLM {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLM for FakeLLM {
    async fn complete(
        &self,
        _tier: ModelTier,
        _system: &str,
        messages: &[ConversationTurn],
        _max_tokens: u32,
    ) -> CoreResult<String> {
        if self.fail {
            return Err(CoreError::LlmUnavailable("fake llm configured to fail".to_string()));
        }
        Ok(messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" "))
    }
}

/// Passes candidates through unchanged aside from truncating to `top_k`,
/// preserving the order `VectorStore::search` already ranked them in.
pub struct FakeReranker;

#[async_trait]
impl Reranker for FakeReranker {
    async fn rerank(&self, _query: &str, mut candidates: Vec<Hit>, top_k: usize) -> CoreResult<Vec<Hit>> {
        candidates.truncate(top_k);
        Ok(candidates)
    }
}

/// In-memory `Backend`: a `Vec<ChunkRecord>` behind a mutex, cosine
/// similarity via dot product (embeddings are assumed L2-normalized).
#[derive(Default)]
pub struct InMemoryBackend {
    records: Mutex<Vec<ChunkRecord>>,
}

impl InMemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn insert_chunks(&self, chunks: Vec<ChunkRecord>) -> CoreResult<()> {
        self.records.lock().extend(chunks);
        Ok(())
    }

    async fn get_chunks_by_url(&self, page_url: &str) -> CoreResult<Vec<ChunkRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.page_url == page_url)
            .cloned()
            .collect())
    }

    async fn delete_chunks_by_url(&self, page_url: &str) -> CoreResult<usize> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.page_url != page_url);
        Ok(before - records.len())
    }

    async fn delete_domain(&self, domain: &str) -> CoreResult<usize> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.domain != domain);
        Ok(before - records.len())
    }

    async fn search_similar(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> CoreResult<Vec<(ChunkRecord, f32)>> {
        let mut scored: Vec<(ChunkRecord, f32)> = self
            .records
            .lock()
            .iter()
            .filter_map(|r| {
                r.embedding.as_ref().map(|e| {
                    let score = dot(query_embedding, e);
                    (r.clone(), score)
                })
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn count(&self) -> CoreResult<usize> {
        Ok(self.records.lock().len())
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
