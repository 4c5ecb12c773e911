//! Retrieval-augmented context shaping
//!
//! Features:
//! - Query normalization with Korean tech-term aliases and multi-query
//!   expansion
//! - Backend retriever with per-variant fan-out, stable dedup, dynamic
//!   hybrid alpha, and a one-shot schema fallback over text-field names
//! - MMR (Maximal Marginal Relevance) diversification over candidate
//!   embeddings
//! - Batched LLM reranker with id-stable JSON parsing
//! - Two-tier compressor: embedding-filter heuristic plus an optional
//!   LLM extractive tier with budget-driven triggering

pub mod compressor;
pub mod embedding_filter;
pub mod filters;
pub mod matching;
pub mod mmr;
pub mod query;
pub mod reranker;
pub mod retriever;
pub mod snippets;

pub use compressor::{compress_docs, CompressOptions, CompressOutcome};
pub use embedding_filter::EmbeddingsFilter;
pub use filters::normalize_filters;
pub use matching::{count_hits, kw_hit};
pub use mmr::{mmr_select, MmrConfig};
pub use query::{expand_queries, ko_tech_aliases, kw_tokens, kw_tokens_split, normalize_query, NormalizeMode};
pub use reranker::{LlmReranker, RerankConfig};
pub use retriever::{BackendRetriever, RetrieveOptions, RetrieverConfig};
pub use snippets::extract_snippets;
