//! Vector store capability: a low-level `Backend` trait operating on
//! already-embedded records, and a `VectorStore` that composes a `Backend`
//! with an `Embedder` to expose the text-level operations the spec
//! describes (`upsert_chunks`, `search`, `delete_domain`, `health`).
//!
//! The `Backend`/`ChunkRecord` split mirrors `wg-ragsmith::stores::mod`.

pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capabilities::Embedder;
use crate::error::{CoreError, CoreResult};
use crate::types::{Chunk, Hit};

/// A chunk together with its (possibly absent, pre-embedding) vector, as
/// stored by a `Backend` implementation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub domain: String,
    pub site_name: String,
    pub page_name: String,
    pub page_url: String,
    pub chunk_text: String,
    pub embedding: Option<Vec<f32>>,
}

impl ChunkRecord {
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

impl From<Chunk> for ChunkRecord {
    fn from(c: Chunk) -> Self {
        ChunkRecord {
            chunk_id: c.chunk_id,
            domain: c.domain,
            site_name: c.site_name,
            page_name: c.page_name,
            page_url: c.page_url,
            chunk_text: c.chunk_text,
            embedding: c.embedding,
        }
    }
}

/// Storage-side capability: operates purely on already-embedded records. A
/// `VectorStore` (below) is the layer that knows about text and embedding.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn insert_chunks(&self, chunks: Vec<ChunkRecord>) -> CoreResult<()>;
    async fn get_chunks_by_url(&self, page_url: &str) -> CoreResult<Vec<ChunkRecord>>;
    async fn delete_chunks_by_url(&self, page_url: &str) -> CoreResult<usize>;
    async fn delete_domain(&self, domain: &str) -> CoreResult<usize>;
    async fn search_similar(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> CoreResult<Vec<(ChunkRecord, f32)>>;
    async fn count(&self) -> CoreResult<usize>;
    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub backend: String,
    pub collection_name: String,
}

/// Composes a `Backend` with an `Embedder` to implement the spec's
/// text-level vector store operations (§4.5).
pub struct VectorStore {
    backend: Arc<dyn Backend>,
    embedder: Arc<dyn Embedder>,
    collection_name: String,
}

impl VectorStore {
    pub fn new(backend: Arc<dyn Backend>, embedder: Arc<dyn Embedder>) -> Self {
        VectorStore {
            backend,
            embedder,
            collection_name: "chunks".to_string(),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Deletes any existing records for `(domain, page_url)`, embeds
    /// `texts`, and inserts. Atomic per page: either all chunks are visible
    /// afterward or none are (achieved by deleting only after embedding
    /// succeeds, then inserting the full batch in one call).
    pub async fn upsert_chunks(
        &self,
        domain: &str,
        site_name: &str,
        page_name: &str,
        page_url: &str,
        texts: Vec<String>,
    ) -> CoreResult<usize> {
        if domain.is_empty() {
            return Err(CoreError::NormalizeError(
                "chunk domain must not be empty".to_string(),
            ));
        }

        let embeddings = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_batch(&texts).await?
        };

        let records: Vec<ChunkRecord> = texts
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(ordinal, (text, embedding))| ChunkRecord {
                chunk_id: Chunk::chunk_id(domain, &slugify(page_url), ordinal),
                domain: domain.to_string(),
                site_name: site_name.to_string(),
                page_name: page_name.to_string(),
                page_url: page_url.to_string(),
                chunk_text: text,
                embedding: Some(embedding),
            })
            .collect();

        self.backend.delete_chunks_by_url(page_url).await?;
        let count = records.len();
        if count > 0 {
            self.backend.insert_chunks(records).await?;
        }
        Ok(count)
    }

    pub async fn search(
        &self,
        query_text: &str,
        top_k: usize,
        filter_domain: Option<&str>,
        filter_site: Option<&str>,
    ) -> CoreResult<Vec<Hit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embedder
            .embed_batch(&[query_text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| CoreError::VectorStoreUnavailable("embedder returned no vector".into()))?;

        // Over-fetch when filtering so post-filtering still yields up to
        // top_k results when the index holds other domains/sites.
        let fetch_k = if filter_domain.is_some() || filter_site.is_some() {
            (top_k * 4).max(top_k)
        } else {
            top_k
        };

        let results = self.backend.search_similar(&query_embedding, fetch_k).await?;

        let hits = results
            .into_iter()
            .filter(|(record, _)| {
                filter_domain.map_or(true, |d| record.domain == d)
                    && filter_site.map_or(true, |s| record.site_name == s)
            })
            .take(top_k)
            .map(|(record, score)| Hit {
                chunk_id: record.chunk_id,
                domain: record.domain,
                site_name: record.site_name,
                page_name: record.page_name,
                page_url: record.page_url,
                chunk_text: record.chunk_text,
                score,
            })
            .collect();

        Ok(hits)
    }

    pub async fn delete_domain(&self, domain: &str) -> CoreResult<usize> {
        self.backend.delete_domain(domain).await
    }

    pub async fn health(&self) -> CoreResult<HealthStatus> {
        let count = self.backend.count().await;
        Ok(HealthStatus {
            ok: count.is_ok(),
            backend: self.backend.backend_name().to_string(),
            collection_name: self.collection_name.clone(),
        })
    }
}

fn slugify(page_url: &str) -> String {
    page_url
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_replaces_unsafe_chars() {
        assert_eq!(slugify("https://a.test/x?y=1"), "https___a_test_x_y_1");
    }
}
