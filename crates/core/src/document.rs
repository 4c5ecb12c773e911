//! Canonical document record and keying helpers
//!
//! Every pipeline stage exchanges `Document` values. Retrieval adapters map
//! backend hits into this shape, and each stage that mutates metadata works
//! on the string-keyed map so ranking signals (`score`, `distance`,
//! `rerank_score`, `mmr_rank`, ...) survive end to end.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical document carried between pipeline stages.
///
/// Top-level fields mirror the most common metadata keys for convenience;
/// the metadata map remains the source of truth for stage annotations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    /// Textual body (may be empty)
    #[serde(default)]
    pub page_content: String,

    /// String-keyed metadata; always present, never missing
    #[serde(default, deserialize_with = "deserialize_metadata")]
    pub metadata: HashMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,
}

/// Accept metadata delivered either as a map or as a JSON-encoded string.
fn deserialize_metadata<'de, D>(deserializer: D) -> Result<HashMap<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(decode_metadata(raw))
}

/// Decode an arbitrary metadata value into a mapping.
///
/// Sources sometimes hand back metadata as a JSON-encoded string; anything
/// that is not an object (directly or after decoding) becomes an empty map.
pub fn decode_metadata(raw: Value) -> HashMap<String, Value> {
    match raw {
        Value::Object(map) => map.into_iter().collect(),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => HashMap::new(),
        },
        _ => HashMap::new(),
    }
}

impl Document {
    /// Create a document with the given body and empty metadata.
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            ..Default::default()
        }
    }

    /// Build a document from a loose JSON value (pipeline entry point).
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    /// String metadata accessor (non-empty strings only).
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        match self.metadata.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// Finite numeric metadata accessor; numeric strings are accepted.
    pub fn meta_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(finite_f64)
    }

    /// Integer metadata accessor.
    pub fn meta_i64(&self, key: &str) -> Option<i64> {
        match self.metadata.get(key) {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }

    /// Effective chunk index: top-level field or metadata.
    pub fn chunk_index(&self) -> Option<i64> {
        self.chunk_index.or_else(|| self.meta_i64("chunk_index"))
    }

    /// Effective page: top-level field or metadata.
    pub fn page(&self) -> Option<i64> {
        self.page.or_else(|| self.meta_i64("page"))
    }

    /// Embedding vector, if any stage or the backend attached one.
    ///
    /// Lookup order: `metadata.embedding`, `metadata.vector`, `doc.embedding`.
    pub fn embedding_vector(&self) -> Option<Vec<f64>> {
        for key in ["embedding", "vector"] {
            if let Some(Value::Array(items)) = self.metadata.get(key) {
                let vec: Vec<f64> = items.iter().filter_map(|v| v.as_f64()).collect();
                if vec.len() == items.len() && !vec.is_empty() {
                    return Some(vec);
                }
            }
        }
        self.embedding.clone()
    }
}

/// Coerce a JSON value into a finite float.
pub fn finite_f64(value: &Value) -> Option<f64> {
    let out = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    out.is_finite().then_some(out)
}

/// Stable, hashable key for a document or chunk.
///
/// Used for deduplication across multi-query merges, set membership in
/// compression, and tie-breaks across MMR/rerank.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StableKey {
    Id(String),
    FileChunk(String, i64),
    TitleChunk(String, i64),
    Identity(usize),
}

/// Resolve the stable key for a document.
///
/// Preference order:
///   1) Explicit ids: `doc_id`, or `(file_id, chunk_index)`
///   2) Metadata ids: `weaviate_id`, `id`, `uuid`, `chunk_id`
///   3) `(title, chunk_index)` as a soft key
///   4) Object identity
pub fn stable_key(d: &Document) -> StableKey {
    if let Some(doc_id) = d.doc_id.as_deref().filter(|s| !s.is_empty()) {
        return StableKey::Id(doc_id.to_string());
    }
    if let (Some(file_id), Some(idx)) = (
        d.file_id.as_deref().filter(|s| !s.is_empty()),
        d.chunk_index(),
    ) {
        return StableKey::FileChunk(file_id.to_string(), idx);
    }

    for key in ["weaviate_id", "id", "uuid", "chunk_id"] {
        if let Some(v) = d.meta_str(key) {
            return StableKey::Id(v.to_string());
        }
    }
    if let Some(chunk_id) = d.chunk_id.as_deref().filter(|s| !s.is_empty()) {
        return StableKey::Id(chunk_id.to_string());
    }

    if let (Some(title), Some(idx)) = (d.title.as_deref().filter(|s| !s.is_empty()), d.chunk_index())
    {
        return StableKey::TitleChunk(title.to_string(), idx);
    }

    StableKey::Identity(d as *const Document as usize)
}

/// Merge key for multi-query result dedup.
///
/// Looser than `stable_key`: falls back through uri, title/page/chunk and
/// finally a content hash so near-identical hits from different query
/// variants still collapse.
pub fn merge_key(d: &Document) -> String {
    if let Some(id) = d
        .chunk_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .or_else(|| d.meta_str("chunk_id"))
        .or_else(|| d.meta_str("id"))
        .or_else(|| d.doc_id.as_deref().filter(|s| !s.is_empty()))
        .or_else(|| d.meta_str("doc_id"))
    {
        return id.to_string();
    }
    if let Some(uri) = d.uri.as_deref().filter(|s| !s.is_empty()) {
        return format!("uri:{uri}");
    }
    let title = d
        .title
        .as_deref()
        .or_else(|| d.meta_str("filename"))
        .unwrap_or("");
    let page = d.page();
    let chunk_index = d.chunk_index();
    if !title.is_empty() || page.is_some() || chunk_index.is_some() {
        return format!(
            "{title}|{}|{}",
            page.map(|p| p.to_string()).unwrap_or_default(),
            chunk_index.map(|c| c.to_string()).unwrap_or_default()
        );
    }
    let mut hasher = DefaultHasher::new();
    d.page_content.hash(&mut hasher);
    format!("content:{}", hasher.finish())
}

/// Retrieval score estimate for ranking.
///
/// Priority: `doc.score`, `metadata.__orig_score`, `metadata.score`,
/// `1 - metadata.distance`, else `-inf`.
pub fn doc_score(d: &Document) -> f64 {
    if let Some(s) = d.score.filter(|s| s.is_finite()) {
        return s;
    }
    if let Some(s) = d.meta_f64("__orig_score") {
        return s;
    }
    if let Some(s) = d.meta_f64("score") {
        return s;
    }
    if let Some(dist) = d.meta_f64("distance") {
        return 1.0 - dist;
    }
    f64::NEG_INFINITY
}

/// Rerank score if present, else `-inf`.
pub fn doc_rerank_score(d: &Document) -> f64 {
    d.meta_f64("rerank_score").unwrap_or(f64::NEG_INFINITY)
}

/// Original retrieval rank; a large value means unknown (sorts last).
pub fn doc_rank(d: &Document) -> i64 {
    d.meta_i64("__orig_rank").unwrap_or(1_000_000_000)
}

/// Total `page_content` length across documents.
pub fn total_chars(docs: &[Document]) -> usize {
    docs.iter().map(|d| d.page_content.chars().count()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc_with_meta(meta: Value) -> Document {
        let mut d = Document::new("body");
        d.metadata = decode_metadata(meta);
        d
    }

    #[test]
    fn test_stable_key_prefers_doc_id() {
        let mut d = Document::new("x");
        d.doc_id = Some("D1".into());
        d.metadata.insert("chunk_id".into(), json!("c9"));
        assert_eq!(stable_key(&d), StableKey::Id("D1".into()));
    }

    #[test]
    fn test_stable_key_file_chunk_pair() {
        let mut d = Document::new("x");
        d.file_id = Some("f1".into());
        d.chunk_index = Some(3);
        assert_eq!(stable_key(&d), StableKey::FileChunk("f1".into(), 3));
    }

    #[test]
    fn test_stable_key_metadata_order() {
        let d = doc_with_meta(json!({"uuid": "u1", "chunk_id": "c1"}));
        assert_eq!(stable_key(&d), StableKey::Id("u1".into()));
    }

    #[test]
    fn test_stable_key_identity_fallback_differs() {
        let a = Document::new("a");
        let b = Document::new("a");
        assert_ne!(stable_key(&a), stable_key(&b));
    }

    #[test]
    fn test_merge_key_chain() {
        let mut d = Document::new("x");
        d.uri = Some("https://e/x".into());
        assert_eq!(merge_key(&d), "uri:https://e/x");

        let mut d = Document::new("x");
        d.title = Some("T".into());
        d.page = Some(2);
        assert_eq!(merge_key(&d), "T|2|");

        let d = Document::new("same body");
        let e = Document::new("same body");
        assert_eq!(merge_key(&d), merge_key(&e));
    }

    #[test]
    fn test_metadata_decoded_from_json_string() {
        let d = Document::from_value(json!({
            "page_content": "hello",
            "metadata": "{\"chunk_id\": \"c1\", \"score\": 0.5}",
        }));
        assert_eq!(d.meta_str("chunk_id"), Some("c1"));
        assert_eq!(d.meta_f64("score"), Some(0.5));
    }

    #[test]
    fn test_metadata_garbage_becomes_empty_map() {
        let d = Document::from_value(json!({"page_content": "x", "metadata": "not-json"}));
        assert!(d.metadata.is_empty());
        let d = Document::from_value(json!({"page_content": "x", "metadata": [1, 2]}));
        assert!(d.metadata.is_empty());
    }

    #[test]
    fn test_doc_score_priority() {
        let mut d = doc_with_meta(json!({"score": 0.2, "__orig_score": 0.4}));
        assert_eq!(doc_score(&d), 0.4);
        d.score = Some(0.9);
        assert_eq!(doc_score(&d), 0.9);

        let d = doc_with_meta(json!({"distance": 0.3}));
        assert!((doc_score(&d) - 0.7).abs() < 1e-9);

        let d = Document::new("x");
        assert_eq!(doc_score(&d), f64::NEG_INFINITY);
    }

    #[test]
    fn test_doc_score_ignores_non_finite() {
        let mut d = Document::new("x");
        d.score = Some(f64::NAN);
        d.metadata.insert("score".into(), json!(0.25));
        assert_eq!(doc_score(&d), 0.25);
    }

    #[test]
    fn test_doc_rank_default() {
        let d = Document::new("x");
        assert_eq!(doc_rank(&d), 1_000_000_000);
        let d = doc_with_meta(json!({"__orig_rank": 4}));
        assert_eq!(doc_rank(&d), 4);
    }

    #[test]
    fn test_embedding_vector_lookup_order() {
        let d = doc_with_meta(json!({"vector": [1.0, 0.0]}));
        assert_eq!(d.embedding_vector(), Some(vec![1.0, 0.0]));

        let mut d = Document::new("x");
        d.embedding = Some(vec![0.0, 1.0]);
        assert_eq!(d.embedding_vector(), Some(vec![0.0, 1.0]));

        let d = doc_with_meta(json!({"embedding": [0.5], "vector": [1.0]}));
        assert_eq!(d.embedding_vector(), Some(vec![0.5]));
    }

    #[test]
    fn test_total_chars() {
        let docs = vec![Document::new("abcd"), Document::new("ef")];
        assert_eq!(total_chars(&docs), 6);
    }
}
