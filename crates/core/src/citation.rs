//! Citation records attached to the packed context

use serde::{Deserialize, Serialize};

use crate::document::Document;

/// Per-context-doc citation.
///
/// `source_id` values are assigned sequentially (`S1..Sn`) in final packing
/// order. Scores are guaranteed finite; non-finite values are reported as
/// absent rather than serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub id: String,
    pub source_id: String,
    pub title: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Citation {
    /// Build the citation for a packed document.
    ///
    /// Fields resolve through the usual fallback chains over both top-level
    /// document fields and metadata; `n` is the number of citations emitted
    /// so far.
    pub fn for_doc(d: &Document, n: usize) -> Self {
        let source_id = format!("S{}", n + 1);
        let title = d
            .title
            .clone()
            .or_else(|| d.meta_str("filename").map(str::to_string))
            .unwrap_or_else(|| "Untitled".to_string());

        let chunk_id = d
            .chunk_id
            .clone()
            .or_else(|| d.meta_str("chunk_id").map(str::to_string))
            .or_else(|| d.meta_str("id").map(str::to_string))
            .or_else(|| d.doc_id.clone());
        let uri = d
            .uri
            .clone()
            .or_else(|| d.meta_str("uri").map(str::to_string))
            .or_else(|| d.meta_str("url").map(str::to_string));

        let rerank_score = d
            .meta_f64("rerank_score")
            .or_else(|| d.meta_f64("score"))
            .or(d.score.filter(|s| s.is_finite()));

        let snippet = d
            .snippet
            .clone()
            .or_else(|| d.meta_str("snippet").map(str::to_string))
            .unwrap_or_else(|| head_snippet(&d.page_content, 240));

        Self {
            id: source_id.clone(),
            source_id,
            title: title.clone(),
            file_name: title,
            uri,
            chunk_id,
            page: d.page(),
            snippet,
            rerank_score,
            score: rerank_score,
        }
    }
}

/// Whitespace-collapsed head of the text, ellipsis-terminated if truncated.
pub fn head_snippet(text: &str, max_chars: usize) -> String {
    let compact = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.chars().count() <= max_chars {
        return compact;
    }
    let head: String = compact.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{head}...")
}
