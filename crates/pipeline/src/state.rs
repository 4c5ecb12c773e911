//! Request-scoped pipeline state
//!
//! A single mutable value accumulated across stages; created at pipeline
//! entry, discarded after the prompt is returned. There is no
//! cross-request persistence here.

use chat_worker_core::{Citation, Document};

use crate::overrides::RagOverrides;
use crate::prompt::ChatPrompt;
use crate::stream::StreamContext;

#[derive(Debug, Default)]
pub struct RagState {
    /// Original user query
    pub question: String,
    /// Per-request override configuration
    pub rag: RagOverrides,
    /// Stream publisher + recorder + ids for telemetry
    pub stream: StreamContext,

    /// Merged, deduplicated retrieval results
    pub docs: Option<Vec<Document>>,
    /// Docs sorted by rerank score
    pub reranked_docs: Option<Vec<Document>>,
    /// Diversified subset
    pub mmr_docs: Option<Vec<Document>>,
    /// Final document subset within budget
    pub compressed_docs: Option<Vec<Document>>,

    /// Count after the heuristic compression tier
    pub heuristic_hits: Option<usize>,
    /// Whether the LLM compression tier ran and changed anything
    pub llm_applied: Option<bool>,

    /// Packed prompt context string
    pub context: Option<String>,
    /// Ordered citation records, 1:1 with packed docs
    pub citations: Vec<Citation>,
    /// Fully rendered prompt value
    pub prompt: Option<ChatPrompt>,
}

impl RagState {
    pub fn new(question: impl Into<String>, rag: RagOverrides, stream: StreamContext) -> Self {
        Self {
            question: question.into(),
            rag,
            stream,
            ..Default::default()
        }
    }

    /// Latest populated stage output, for join-context fallback.
    pub fn best_docs(&self) -> &[Document] {
        self.compressed_docs
            .as_deref()
            .or(self.mmr_docs.as_deref())
            .or(self.reranked_docs.as_deref())
            .or(self.docs.as_deref())
            .unwrap_or(&[])
    }
}
