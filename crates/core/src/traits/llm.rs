//! Language-model ports
//!
//! The pipeline only needs full responses; token streaming belongs to the
//! excluded LLM transport layer.

use async_trait::async_trait;

use crate::{Document, Result};

/// Completion call parameters forwarded to the model client.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub model: Option<String>,
    pub temperature: f64,
    pub max_output_tokens: u32,
    /// Deadline for the call, in milliseconds
    pub timeout_ms: Option<u64>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.0,
            max_output_tokens: 600,
            timeout_ms: None,
        }
    }
}

/// Full-response completion port backing the rerank and compress adapters.
#[async_trait]
pub trait LlmBackend: Send + Sync + 'static {
    /// Run a single prompt to completion and return the raw text.
    async fn complete(&self, prompt: &str, opts: &CompletionOptions) -> Result<String>;
}

/// Reranker configuration snapshot reported in stage telemetry.
#[derive(Debug, Clone, Default)]
pub struct RerankSnapshot {
    pub name: Option<String>,
    pub top_n: Option<usize>,
    pub max_candidates: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_doc_chars: Option<usize>,
}

/// Document reranking port.
#[async_trait]
pub trait Reranker: Send + Sync + 'static {
    /// Reorder documents by relevance to the query.
    ///
    /// Implementations annotate `metadata.rerank_score` (and optionally
    /// `metadata.rerank_reason`) on the returned documents.
    async fn rerank(&self, query: &str, docs: Vec<Document>) -> Result<Vec<Document>>;

    /// Configuration snapshot for stage telemetry.
    fn config_snapshot(&self) -> Option<RerankSnapshot> {
        None
    }
}

/// Extractive document compression port.
#[async_trait]
pub trait LlmCompressor: Send + Sync + 'static {
    /// Compress each document's body down to the query-relevant parts.
    async fn compress(&self, query: &str, docs: Vec<Document>) -> Result<Vec<Document>>;
}
