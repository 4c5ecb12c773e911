//! LLM-based reranker
//!
//! Scores candidate passages with a prompt-based model call, in batches,
//! and reorders by the returned scores. Candidates are addressed by stable
//! ids so the JSON response can be mapped back even when the model reorders
//! or drops entries; docs missing from a batch response keep a `-inf` score
//! but stay in the output.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, warn};

use chat_worker_core::{
    CompletionOptions, Document, Error, LlmBackend, Reranker, RerankSnapshot, Result,
};
use chat_worker_config::RerankSettings;

/// Runtime knobs for reranking.
#[derive(Debug, Clone)]
pub struct RerankConfig {
    /// Hard cap of retrieved candidates considered (0 disables the cap)
    pub max_candidates: usize,
    /// Docs kept after reranking (0 = no cap)
    pub top_n: usize,
    /// LLM call batching
    pub batch_size: usize,
    /// Per-doc content trimming in characters
    pub max_doc_chars: usize,
    pub temperature: f64,
    pub max_output_tokens: u32,
    /// If rerank fails, return input order
    pub fail_open: bool,
    /// Deadline per batch call, in milliseconds
    pub timeout_ms: Option<u64>,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            max_candidates: 30,
            top_n: 8,
            batch_size: 12,
            max_doc_chars: 1800,
            temperature: 0.0,
            max_output_tokens: 600,
            fail_open: true,
            timeout_ms: None,
        }
    }
}

impl From<&RerankSettings> for RerankConfig {
    fn from(settings: &RerankSettings) -> Self {
        Self {
            max_candidates: settings.max_candidates,
            top_n: settings.top_n,
            batch_size: settings.batch_size,
            max_doc_chars: settings.max_doc_chars,
            temperature: settings.temperature,
            max_output_tokens: settings.max_output_tokens,
            fail_open: settings.fail_open,
            timeout_ms: settings.timeout_ms,
        }
    }
}

/// Prompt-scoring reranker over a completion backend.
pub struct LlmReranker {
    llm: Arc<dyn LlmBackend>,
    config: RerankConfig,
}

impl LlmReranker {
    pub fn new(llm: Arc<dyn LlmBackend>, config: RerankConfig) -> Self {
        Self { llm, config }
    }

    async fn call_llm(&self, prompt: &str) -> Result<String> {
        let opts = CompletionOptions {
            model: None,
            temperature: self.config.temperature,
            max_output_tokens: self.config.max_output_tokens,
            timeout_ms: self.config.timeout_ms,
        };
        match self.config.timeout_ms {
            Some(ms) => tokio::time::timeout(
                Duration::from_millis(ms),
                self.llm.complete(prompt, &opts),
            )
            .await
            .map_err(|_| Error::Rerank("rerank call deadline elapsed".to_string()))?,
            None => self.llm.complete(prompt, &opts).await,
        }
    }

    async fn rerank_inner(&self, query: &str, docs: &[Document]) -> Result<Vec<Document>> {
        let cfg = &self.config;

        // 1) Cap candidates; 0 disables the cap.
        let cap = if cfg.max_candidates > 0 {
            cfg.max_candidates.min(docs.len())
        } else {
            docs.len()
        };
        let mut candidates: Vec<Document> = docs[..cap].to_vec();
        debug!(input = docs.len(), candidates = candidates.len(), "rerank start");

        // 2) Score in batches.
        let batch_size = cfg.batch_size.max(1);
        let mut scored: Vec<(usize, f64)> = Vec::with_capacity(candidates.len());
        let mut offset = 0;
        while offset < candidates.len() {
            let end = (offset + batch_size).min(candidates.len());
            let batch_indices: Vec<usize> = (offset..end).collect();

            let items = prepare_items(&candidates, &batch_indices, cfg.max_doc_chars);
            let prompt = build_prompt(query, &candidates, &items);
            let raw = self.call_llm(&prompt).await?;
            let results = parse_llm_json(&raw)?;
            debug!(items = items.len(), results = results.len(), "rerank batch");

            let mut consumed: Vec<bool> = vec![false; items.len()];
            for (rid, score, reason) in &results {
                let Some(pos) = items
                    .iter()
                    .position(|item| item.id == *rid)
                    .filter(|&pos| !consumed[pos])
                else {
                    continue;
                };
                consumed[pos] = true;
                let doc_idx = items[pos].doc_idx;
                let md = &mut candidates[doc_idx].metadata;
                md.insert("rerank_score".into(), json!(score));
                if let Some(reason) = reason {
                    md.insert("rerank_reason".into(), json!(reason));
                }
                scored.push((doc_idx, *score));
            }

            // Docs missing from the response get a very low score but stay.
            // Stored as the string "-inf": serde_json numbers cannot carry
            // non-finite values, and every downstream reader filters to
            // finite floats anyway.
            for (pos, item) in items.iter().enumerate() {
                if consumed[pos] {
                    continue;
                }
                let md = &mut candidates[item.doc_idx].metadata;
                md.entry("rerank_score".to_string())
                    .or_insert_with(|| json!("-inf"));
                scored.push((item.doc_idx, f64::NEG_INFINITY));
            }

            offset = end;
        }

        // 3) Global sort (stable: batch order breaks ties) and cut.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut seen: Vec<bool> = vec![false; candidates.len()];
        let mut out: Vec<Document> = Vec::with_capacity(scored.len());
        for (doc_idx, _) in scored {
            if seen[doc_idx] {
                continue;
            }
            seen[doc_idx] = true;
            out.push(candidates[doc_idx].clone());
        }

        if cfg.top_n > 0 {
            out.truncate(cfg.top_n);
        }

        debug!(output = out.len(), "rerank done");
        Ok(out)
    }
}

#[async_trait]
impl Reranker for LlmReranker {
    async fn rerank(&self, query: &str, docs: Vec<Document>) -> Result<Vec<Document>> {
        if query.is_empty() || docs.is_empty() {
            return Ok(docs);
        }

        match self.rerank_inner(query, &docs).await {
            Ok(out) => Ok(out),
            Err(err) if self.config.fail_open => {
                warn!("rerank failed, fail-open applied: {err}");
                let mut out = docs;
                if self.config.top_n > 0 {
                    out.truncate(self.config.top_n);
                }
                Ok(out)
            }
            Err(err) => Err(err),
        }
    }

    fn config_snapshot(&self) -> Option<RerankSnapshot> {
        Some(RerankSnapshot {
            name: Some("llm".to_string()),
            top_n: Some(self.config.top_n),
            max_candidates: Some(self.config.max_candidates),
            batch_size: Some(self.config.batch_size),
            max_doc_chars: Some(self.config.max_doc_chars),
        })
    }
}

/// One prepared batch member: unique stable id plus trimmed preview text.
struct BatchItem {
    id: String,
    doc_idx: usize,
    preview: String,
}

/// Assign a unique stable id to each batch member: metadata id when
/// available, positional fallback, `#n` suffix for duplicates.
fn prepare_items(
    candidates: &[Document],
    batch_indices: &[usize],
    max_doc_chars: usize,
) -> Vec<BatchItem> {
    let mut items: Vec<BatchItem> = Vec::with_capacity(batch_indices.len());
    for &doc_idx in batch_indices {
        let d = &candidates[doc_idx];
        let base = doc_stable_id(d, doc_idx);
        let mut rid = base.clone();
        let mut suffix = 1;
        while items.iter().any(|item| item.id == rid) {
            rid = format!("{base}#{suffix}");
            suffix += 1;
        }
        items.push(BatchItem {
            id: rid,
            doc_idx,
            preview: trim_text(&d.page_content, max_doc_chars),
        });
    }
    items
}

fn doc_stable_id(d: &Document, fallback: usize) -> String {
    for key in ["chunk_id", "id", "doc_id", "source_id"] {
        if let Some(v) = d.meta_str(key) {
            return v.to_string();
        }
    }
    if let Some(chunk_id) = d.chunk_id.as_deref().filter(|s| !s.is_empty()) {
        return chunk_id.to_string();
    }
    if let Some(doc_id) = d.doc_id.as_deref().filter(|s| !s.is_empty()) {
        return doc_id.to_string();
    }
    fallback.to_string()
}

/// Collapse whitespace and trim to `max_chars`, ellipsis-terminated.
fn trim_text(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return text.to_string();
    }
    let compact = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.chars().count() <= max_chars {
        return compact;
    }
    let head: String = compact.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{head}…")
}

/// Build a strict JSON-output prompt.
///
/// The response must be a JSON array of `{"id", "score", "reason"}`
/// objects, score-descending, scores in [0, 1].
fn build_prompt(query: &str, candidates: &[Document], items: &[BatchItem]) -> String {
    let header = "You are a reranking engine for retrieval-augmented generation.\n\
        Given a user query and a list of candidate passages, rank the passages by how directly and specifically they answer the query.\n\
        Return ONLY valid JSON (no markdown, no commentary).\n\n\
        Rules:\n\
        - Prefer passages that contain concrete facts or definitions that answer the query.\n\
        - Penalize passages that are off-topic, too generic, or only mention filenames/titles without content.\n\
        - Scores must be between 0 and 1.\n\
        - Include at most one short sentence for 'reason'.\n\n";

    let mut parts = String::from(header);
    parts.push_str(&format!("QUERY:\n{query}\n\nCANDIDATES:\n"));

    for (idx, item) in items.iter().enumerate() {
        let d = &candidates[item.doc_idx];
        let title = d
            .meta_str("filename")
            .or_else(|| d.meta_str("title"))
            .or_else(|| d.meta_str("source"))
            .or(d.title.as_deref())
            .unwrap_or("");
        let mut loc = title.to_string();
        if let Some(page) = d.page() {
            loc = format!("{loc} p.{page}").trim().to_string();
        }

        let passage = serde_json::to_string(&item.preview).unwrap_or_else(|_| "\"\"".to_string());

        parts.push_str(&format!(
            "[{}] id={}\nlocation={}\npassage={}\n",
            idx + 1,
            item.id,
            loc,
            passage
        ));
    }

    parts.push_str(
        "\nOUTPUT JSON SCHEMA:\n\
        [\n  {\"id\": \"<candidate id>\", \"score\": <0..1>, \"reason\": \"<short>\"}\n]\n\
        Return one object per candidate id (same count as input), sorted by score desc.\n",
    );

    parts
}

static JSON_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").unwrap());

/// Parse model output into `(id, score, reason)` triples.
///
/// Accepts strict JSON; if the model wraps JSON in text, the first JSON
/// array substring is extracted. Scores are clamped to [0, 1].
fn parse_llm_json(raw: &str) -> Result<Vec<(String, f64, Option<String>)>> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(Error::MalformedOutput("empty reranker output".to_string()));
    }

    let data: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            let m = JSON_ARRAY
                .find(text)
                .ok_or_else(|| Error::MalformedOutput("no JSON array in output".to_string()))?;
            serde_json::from_str(m.as_str())
                .map_err(|e| Error::MalformedOutput(e.to_string()))?
        }
    };

    let Value::Array(entries) = data else {
        return Err(Error::MalformedOutput(
            "reranker output is not a JSON array".to_string(),
        ));
    };

    let mut out = Vec::with_capacity(entries.len());
    for obj in entries {
        let Value::Object(map) = obj else { continue };
        let Some(rid) = map.get("id") else { continue };
        let Some(score) = map.get("score").and_then(Value::as_f64) else {
            continue;
        };
        let rid = match rid {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let reason = map.get("reason").and_then(Value::as_str).map(str::to_string);
        out.push((rid, score.clamp(0.0, 1.0), reason));
    }

    Ok(out)
}
