//! Core types and ports for the chat worker
//!
//! This crate provides the foundational pieces shared across the RAG
//! pipeline crates:
//! - Canonical `Document` record with string-keyed metadata
//! - Stable keys and score helpers used for dedup and tie-breaking
//! - Citation records emitted alongside the packed context
//! - Ports for pluggable backends (search, embeddings, rerank, compression,
//!   event streaming, persistence)
//! - Error taxonomy

pub mod citation;
pub mod document;
pub mod error;
pub mod traits;

pub use citation::Citation;
pub use document::{
    doc_rank, doc_rerank_score, doc_score, merge_key, stable_key, total_chars, Document, StableKey,
};
pub use error::{Error, Result};
pub use traits::{
    ChatRepository, CompletionOptions, Embeddings, EventSink, LlmBackend, LlmCompressor, Reranker,
    RerankSnapshot, SearchBackend, SearchHit, SearchMode, SearchRequest, WhereFilter,
};
