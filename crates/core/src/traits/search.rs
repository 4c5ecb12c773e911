//! Search backend and embedding ports

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Retrieval operator selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Weighted combination of BM25 and vector scoring
    #[default]
    Hybrid,
    /// Semantic query relying on the backend's vectorizer
    NearText,
}

impl SearchMode {
    /// Parse a loose user-provided value (`"hybrid"` / `"near_text"`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "hybrid" => Some(Self::Hybrid),
            "near_text" => Some(Self::NearText),
            _ => None,
        }
    }
}

/// Filter tree handed to the backend.
///
/// Built from flat app-level filter maps; see the filter translation rules
/// in the rag crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", rename_all = "PascalCase")]
pub enum WhereFilter {
    /// Case-insensitive partial text match
    TextContains { path: String, value: String },
    /// Boolean equality
    EqualBool { path: String, value: bool },
    /// Numeric equality
    EqualNumber { path: String, value: f64 },
    And { operands: Vec<WhereFilter> },
    Or { operands: Vec<WhereFilter> },
}

/// A single backend query.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub mode: SearchMode,
    pub collection: String,
    /// Property holding the chunk body
    pub text_field: String,
    pub query: String,
    pub top_k: usize,
    pub filters: Option<WhereFilter>,
    /// Hybrid weighting in [0, 1] (0 = lexical only, 1 = vector only)
    pub alpha: Option<f64>,
    /// near_text distance cap
    pub distance: Option<f64>,
    /// BM25 query properties for hybrid mode
    pub bm25_properties: Vec<String>,
    /// Ask the backend to return stored vectors
    pub include_vector: bool,
}

/// Raw hit returned by the backend before document mapping.
#[derive(Debug, Clone, Default)]
pub struct SearchHit {
    /// Object id assigned by the backend, when available
    pub id: Option<String>,
    /// Returned properties (text field, filename, page, ...)
    pub properties: HashMap<String, Value>,
    pub score: Option<f64>,
    pub distance: Option<f64>,
    pub vector: Option<Vec<f64>>,
}

/// Vector collection query port.
///
/// Implementations must be safe for concurrent use; the retriever issues
/// one call per query variant.
///
/// # Errors
/// - [`crate::Error::Schema`] when `text_field` does not exist in the
///   collection (the retriever runs a fallback pass over alternative names)
/// - [`crate::Error::BackendUnavailable`] on transport failure
#[async_trait]
pub trait SearchBackend: Send + Sync + 'static {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>>;
}

/// Embedding port used by the MMR selector fallbacks and the embedding
/// filter inside compression.
#[async_trait]
pub trait Embeddings: Send + Sync + 'static {
    async fn embed_query(&self, text: &str) -> Result<Vec<f64>>;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f64>>>;
}
