//! Ports for pluggable backends
//!
//! All external collaborators of the pipeline are expressed as traits so
//! implementations can be swapped and mocked:
//!
//! ```text
//! Retrieval:
//!   - SearchBackend: vector collection queries (hybrid / near_text)
//!   - Embeddings: query and document embedding
//! Models:
//!   - LlmBackend: full-response completion used by rerank/compress adapters
//!   - Reranker: document reordering by model-scored relevance
//!   - LlmCompressor: extractive per-document compression
//! Telemetry & persistence:
//!   - EventSink: stream publication + durable event mirror
//!   - ChatRepository: message/citation/job persistence (caller-side)
//! ```

mod events;
mod llm;
mod repository;
mod search;

pub use events::EventSink;
pub use llm::{CompletionOptions, LlmBackend, LlmCompressor, Reranker, RerankSnapshot};
pub use repository::ChatRepository;
pub use search::{Embeddings, SearchBackend, SearchHit, SearchMode, SearchRequest, WhereFilter};
