use async_trait::async_trait;

use crate::error::CoreResult;

/// Produces L2-normalized dense embeddings for batches of text.
///
/// `dimension` must be stable for the lifetime of the embedder instance; the
/// vector store reads it once at open time and never hardcodes a value.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;
}
