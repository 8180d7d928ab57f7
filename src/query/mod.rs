//! The read-side RAG flow: rewrite → retrieve (+optional rerank) → synthesize.

use std::sync::Arc;

use tracing::warn;

use crate::capabilities::{ModelTier, Reranker, LLM};
use crate::config::Config;
use crate::error::CoreResult;
use crate::stores::VectorStore;
use crate::types::{ConversationTurn, Hit, SourceRef};

const REWRITE_SYSTEM_PROMPT: &str =
    "Rewrite the user question as a short keyword-rich query for semantic search; output only the rewritten query.";

const SYNTHESIS_SYSTEM_PROMPT: &str = "Answer only from the provided sources. \
If the sources are insufficient to answer, say so explicitly. Cite sources by title.";

const REWRITE_MAX_TOKENS: u32 = 100;
const SYNTHESIS_MAX_TOKENS: u32 = 1024;
const MAX_TOP_K: usize = 50;

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub query: String,
    pub results: Vec<Hit>,
    pub total_results: usize,
}

#[derive(Debug, Clone)]
pub struct AskResult {
    pub question: String,
    pub optimized_query: String,
    pub answer: String,
    pub sources_used: usize,
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Clone, Default)]
pub struct AskParams {
    pub top_k: Option<usize>,
    pub filter_domain: Option<String>,
    pub filter_site: Option<String>,
    pub conversation_history: Vec<ConversationTurn>,
}

pub struct QueryPipeline {
    vector_store: Arc<VectorStore>,
    llm: Arc<dyn LLM>,
    reranker: Option<Arc<dyn Reranker>>,
    default_top_k: usize,
}

impl QueryPipeline {
    pub fn new(
        vector_store: Arc<VectorStore>,
        llm: Arc<dyn LLM>,
        reranker: Option<Arc<dyn Reranker>>,
        config: &Config,
    ) -> Self {
        QueryPipeline {
            vector_store,
            llm,
            reranker,
            default_top_k: config.default_top_k,
        }
    }

    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter_domain: Option<&str>,
        filter_site: Option<&str>,
    ) -> CoreResult<SearchResult> {
        let top_k = top_k.min(MAX_TOP_K);
        let results = self
            .vector_store
            .search(query, top_k, filter_domain, filter_site)
            .await?;
        Ok(SearchResult {
            query: query.to_string(),
            total_results: results.len(),
            results,
        })
    }

    pub async fn ask(&self, question: &str, params: AskParams) -> CoreResult<AskResult> {
        let top_k = params.top_k.unwrap_or(self.default_top_k).min(MAX_TOP_K);

        let optimized_query = self.rewrite(question, &params.conversation_history).await;

        let fetch_k = if self.reranker.is_some() {
            top_k * 2
        } else {
            top_k
        };

        let mut hits = self
            .vector_store
            .search(
                &optimized_query,
                fetch_k,
                params.filter_domain.as_deref(),
                params.filter_site.as_deref(),
            )
            .await?;

        if let Some(reranker) = &self.reranker {
            hits = reranker.rerank(question, hits, top_k).await?;
        } else {
            hits.truncate(top_k);
        }

        self.synthesize(question, &optimized_query, hits).await
    }

    /// Stage 1: query rewrite. Degrades to the raw question on any LLM
    /// failure, per spec §7 (`LlmUnavailable` never surfaces from this
    /// stage).
    async fn rewrite(&self, question: &str, history: &[ConversationTurn]) -> String {
        let mut messages = history.to_vec();
        messages.push(ConversationTurn {
            role: "user".to_string(),
            content: question.to_string(),
        });

        match self
            .llm
            .complete(ModelTier::Fast, REWRITE_SYSTEM_PROMPT, &messages, REWRITE_MAX_TOKENS)
            .await
        {
            Ok(rewritten) if !rewritten.trim().is_empty() => rewritten.trim().to_string(),
            Ok(_) => question.to_string(),
            Err(err) => {
                warn!(error = %err, "query rewrite failed; falling back to raw question");
                question.to_string()
            }
        }
    }

    /// Stage 3: synthesize an answer grounded in `hits`. Unlike rewrite,
    /// `LlmUnavailable` here is surfaced to the caller rather than absorbed.
    async fn synthesize(
        &self,
        question: &str,
        optimized_query: &str,
        hits: Vec<Hit>,
    ) -> CoreResult<AskResult> {
        if hits.is_empty() {
            return Ok(AskResult {
                question: question.to_string(),
                optimized_query: optimized_query.to_string(),
                answer: "I don't have enough information in the indexed sources to answer that."
                    .to_string(),
                sources_used: 0,
                sources: Vec::new(),
            });
        }

        let context = build_context_block(&hits);
        let messages = vec![ConversationTurn {
            role: "user".to_string(),
            content: format!(
                "Question: {question}\n\n{context}\n\nAnswer the question using only the sources above."
            ),
        }];

        let answer = self
            .llm
            .complete(
                ModelTier::Strong,
                SYNTHESIS_SYSTEM_PROMPT,
                &messages,
                SYNTHESIS_MAX_TOKENS,
            )
            .await?;

        let sources = distinct_sources(&hits);

        Ok(AskResult {
            question: question.to_string(),
            optimized_query: optimized_query.to_string(),
            sources_used: sources.len(),
            answer,
            sources,
        })
    }
}

fn build_context_block(hits: &[Hit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "Source {}: {} — {}\n{}",
                i + 1,
                hit.site_name,
                hit.page_name,
                hit.chunk_text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Distinct `(site_name, page_name, page_url, score)` references, in the
/// order first referenced.
fn distinct_sources(hits: &[Hit]) -> Vec<SourceRef> {
    let mut sources = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for hit in hits {
        if seen.insert(hit.page_url.clone()) {
            sources.push(SourceRef {
                site_name: hit.site_name.clone(),
                page_name: hit.page_name.clone(),
                page_url: hit.page_url.clone(),
                score: hit.score,
            });
        }
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(domain: &str, page_url: &str, score: f32) -> Hit {
        Hit {
            chunk_id: format!("{page_url}#0"),
            domain: domain.to_string(),
            site_name: domain.to_string(),
            page_name: "Page".to_string(),
            page_url: page_url.to_string(),
            chunk_text: "text".to_string(),
            score,
        }
    }

    #[test]
    fn distinct_sources_dedupes_by_url_preserving_order() {
        let hits = vec![
            hit("a.test", "https://a.test/1", 0.9),
            hit("a.test", "https://a.test/2", 0.8),
            hit("a.test", "https://a.test/1", 0.7),
        ];
        let sources = distinct_sources(&hits);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].page_url, "https://a.test/1");
        assert_eq!(sources[1].page_url, "https://a.test/2");
    }

    #[test]
    fn context_block_numbers_sources_in_order() {
        let hits = vec![hit("a.test", "https://a.test/1", 0.9)];
        let block = build_context_block(&hits);
        assert!(block.starts_with("Source 1:"));
    }
}
