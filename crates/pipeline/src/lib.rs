//! Staged RAG prompt-construction pipeline
//!
//! Composes retrieval, reranking, MMR diversification, compression,
//! context packing, and prompt rendering over a single request-scoped
//! state value:
//!
//! ```text
//! IDLE -> RETRIEVING -> RERANKING -> MMR -> COMPRESSING -> JOINING -> PROMPTING -> DONE
//! ```
//!
//! Each stage emits lifecycle telemetry onto the stream bus and mirrors it
//! to the durable event recorder. The pipeline prepares the final prompt
//! and citations but never invokes the generation model itself.

pub mod chain;
pub mod events;
pub mod overrides;
pub mod prompt;
pub mod state;
pub mod stream;

pub use chain::{PipelineInput, PromptResult, RagPipeline, NO_CONTEXT_PLACEHOLDER};
pub use events::{RagSearchEvent, RagStageEvent};
pub use overrides::RagOverrides;
pub use prompt::{ChatMessage, ChatPrompt, PromptTemplate, Role};
pub use state::RagState;
pub use stream::StreamContext;
