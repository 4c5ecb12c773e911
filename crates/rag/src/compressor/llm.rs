//! LLM-based contextual compression
//!
//! Second tier of compression: a per-document model call that extracts the
//! query-relevant parts of each passage. Guardrails fall back to the
//! original document whenever the model output is unusable.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use chat_worker_core::{CompletionOptions, Document, Error, LlmBackend, LlmCompressor, Result};
use chat_worker_config::CompressSettings;

/// Configuration for LLM-based contextual compression.
///
/// `extract_only` instructs the model to only extract verbatim
/// sentences/phrases from the passage (no rewriting), which is safer for
/// citations.
#[derive(Debug, Clone)]
pub struct LlmCompressorConfig {
    pub extract_only: bool,
    /// Hard cap to keep prompts bounded
    pub per_doc_max_chars: usize,
    /// Hard cap for each compressed output
    pub output_max_chars: usize,
    /// Outputs shorter than this are treated as failures
    pub min_keep_chars: usize,
    /// Model label recorded in `compress_model`
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    /// Fall back to original content on LLM errors
    pub fail_open: bool,
}

impl Default for LlmCompressorConfig {
    fn default() -> Self {
        Self {
            extract_only: true,
            per_doc_max_chars: 3500,
            output_max_chars: 1200,
            min_keep_chars: 40,
            model: "llm-compress".to_string(),
            temperature: 0.0,
            max_output_tokens: 600,
            fail_open: true,
        }
    }
}

impl From<&CompressSettings> for LlmCompressorConfig {
    fn from(settings: &CompressSettings) -> Self {
        Self {
            extract_only: settings.extract_only,
            per_doc_max_chars: settings.per_doc_max_chars,
            output_max_chars: settings.output_max_chars,
            min_keep_chars: settings.min_keep_chars,
            model: settings.model.clone(),
            temperature: 0.0,
            max_output_tokens: 600,
            fail_open: settings.fail_open,
        }
    }
}

/// Extractive compressor over a completion backend.
pub struct LlmContextualCompressor {
    llm: Arc<dyn LlmBackend>,
    cfg: LlmCompressorConfig,
}

impl LlmContextualCompressor {
    pub fn new(llm: Arc<dyn LlmBackend>, cfg: LlmCompressorConfig) -> Self {
        Self { llm, cfg }
    }

    async fn compress_one(&self, query: &str, doc: Document, idx: usize) -> Result<Document> {
        let original = doc.page_content.clone();
        let passage = truncate(&original, self.cfg.per_doc_max_chars);

        if passage.trim().is_empty() {
            return Ok(doc);
        }

        let prompt = build_prompt(
            query,
            &passage,
            self.cfg.extract_only,
            self.cfg.output_max_chars,
        );
        let opts = CompletionOptions {
            model: Some(self.cfg.model.clone()),
            temperature: self.cfg.temperature,
            max_output_tokens: self.cfg.max_output_tokens,
            timeout_ms: None,
        };

        let raw = match self.llm.complete(&prompt, &opts).await {
            Ok(raw) => raw,
            Err(e) if self.cfg.fail_open => {
                warn!(idx, id = doc_id(&doc), "llm compress call failed: {e}");
                return Ok(doc);
            }
            Err(e) => return Err(Error::Compress(e.to_string())),
        };

        let (kept, dropped) = match parse_json(&raw) {
            Some(Value::Object(map)) => (
                map.get("kept").cloned(),
                map.get("dropped").cloned(),
            ),
            _ => (None, None),
        };

        let kept_text = truncate(
            kept.as_ref()
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim(),
            self.cfg.output_max_chars,
        );

        // Guardrail: empty/too-short output falls back to the original.
        if kept_text.chars().count() < self.cfg.min_keep_chars {
            debug!(
                idx,
                id = doc_id(&doc),
                kept_len = kept_text.chars().count(),
                "llm compress fallback to original"
            );
            return Ok(doc);
        }

        let mut out = doc;
        out.page_content = kept_text;
        out.metadata.insert("compressed".into(), json!(true));
        out.metadata.insert("compressor".into(), json!("llm"));
        out.metadata
            .insert("compress_model".into(), json!(self.cfg.model));
        if let Some(dropped) = dropped {
            let value = dropped.as_i64().map(|n| json!(n)).unwrap_or(dropped);
            out.metadata.insert("compress_dropped".into(), value);
        }

        debug!(
            idx,
            id = doc_id(&out),
            orig_len = original.chars().count(),
            kept_len = out.page_content.chars().count(),
            "llm compress ok"
        );
        Ok(out)
    }
}

#[async_trait]
impl LlmCompressor for LlmContextualCompressor {
    async fn compress(&self, query: &str, docs: Vec<Document>) -> Result<Vec<Document>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        debug!(input = docs.len(), model = %self.cfg.model, "llm compress start");
        let mut out = Vec::with_capacity(docs.len());
        for (idx, doc) in docs.into_iter().enumerate() {
            out.push(self.compress_one(query, doc, idx + 1).await?);
        }
        debug!(output = out.len(), "llm compress done");
        Ok(out)
    }
}

fn doc_id(doc: &Document) -> String {
    doc.meta_str("chunk_id")
        .or_else(|| doc.meta_str("id"))
        .map(str::to_string)
        .or_else(|| doc.doc_id.clone())
        .unwrap_or_else(|| "<no-id>".to_string())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{head}…")
}

fn build_prompt(query: &str, passage: &str, extract_only: bool, output_max_chars: usize) -> String {
    let mode = if extract_only {
        "Extract verbatim sentences/phrases ONLY. Do not paraphrase or add new facts."
    } else {
        "Compress for relevance. You may lightly rewrite, but must keep facts unchanged."
    };

    format!(
        "You are a contextual compressor for RAG.\n\
         Given a user question and a passage, return only the parts of the passage that are directly useful to answer the question.\n\n\
         Rules:\n- {mode}\n- Remove irrelevant lines.\n- Keep output under {output_max_chars} characters.\n- Output MUST be valid JSON with keys: {{\"kept\": string, \"dropped\": number}}.\n\n\
         Question:\n{query}\n\n\
         Passage:\n{passage}\n"
    )
}

/// Permissive JSON object parse: strict first, then the outermost braces
/// (models wrap JSON in markdown fences or add prefixes).
fn parse_json(text: &str) -> Option<Value> {
    if text.is_empty() {
        return None;
    }
    if let Ok(v) = serde_json::from_str(text) {
        return Some(v);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}
