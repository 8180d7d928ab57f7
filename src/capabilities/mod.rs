//! Narrow capability interfaces the core consumes but never implements
//! concretely. Tests substitute fakes (see `crate::testing`); a real
//! deployment's composition root supplies production implementations.

pub mod browser;
pub mod embedder;
pub mod llm;
pub mod reranker;

pub use browser::{BrowserEngine, FetchOptions, FetchOutcome};
pub use embedder::Embedder;
pub use llm::{ModelTier, LLM};
pub use reranker::Reranker;
