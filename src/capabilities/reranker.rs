use async_trait::async_trait;

use crate::error::CoreResult;
use crate::types::Hit;

/// Optional cross-encoder-style reranking capability. When configured, the
/// query pipeline passes `top_k * 2` candidates through it and keeps the
/// top `top_k`.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, candidates: Vec<Hit>, top_k: usize) -> CoreResult<Vec<Hit>>;
}
