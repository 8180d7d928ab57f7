//! loomrag — the scrape-to-answer pipeline core.
//!
//! ```text
//!   seed URL
//!      |
//!      v
//!  [sitemap::Discoverer] --(whole_site)--> url list
//!      |
//!      v
//!  [fetcher::Fetcher] --(headless render, bounded pool)--> raw HTML
//!      |
//!      v
//!  [normalize] --(strip chrome, render Markdown)--> cleaned page
//!      |
//!      v
//!  [chunker] --(heading-first split, paragraph packing)--> chunk texts
//!      |
//!      v
//!  [stores::VectorStore] --(embed + upsert, domain-partitioned)--> indexed chunks
//!      |
//!      v
//!  [query::QueryPipeline] --(rewrite -> retrieve -> rerank? -> synthesize)--> answer
//! ```
//!
//! [`orchestrator::Orchestrator`] drives the top half of this pipeline for
//! one session; [`query::QueryPipeline`] drives the bottom half on demand.
//! [`ops::Ops`] is the single composition root wiring both, every injected
//! capability (see [`capabilities`]), and [`config::Config`] together behind
//! the stable operations table.

pub mod capabilities;
pub mod chunker;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod normalize;
pub mod ops;
pub mod query;
pub mod session;
pub mod sitemap;
pub mod stores;
pub mod types;
pub mod orchestrator;

pub mod testing;

pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use ops::Ops;
