//! Two-tier document compression
//!
//! The heuristic tier always runs; the LLM tier is gated on configuration,
//! rerank evidence, and how much of the context budget the surviving text
//! would consume.

mod heuristic;
mod llm;

pub use heuristic::{HeuristicCompressor, HeuristicCompressorConfig};
pub use llm::{LlmCompressorConfig, LlmContextualCompressor};

use tracing::{debug, warn};

use chat_worker_core::{total_chars, Document, LlmCompressor, Result};
use chat_worker_config::CompressSettings;

use crate::embedding_filter::EmbeddingsFilter;

/// Per-call compression options.
#[derive(Debug, Clone)]
pub struct CompressOptions {
    pub max_context: Option<usize>,
    pub use_llm: bool,
    pub settings: CompressSettings,
}

/// Compression result with stage telemetry.
#[derive(Debug, Clone)]
pub struct CompressOutcome {
    pub docs: Vec<Document>,
    /// Count after the heuristic tier
    pub heuristic_hits: usize,
    /// Whether the LLM tier ran and changed at least one doc
    pub llm_applied: bool,
}

/// Run the two-tier compressor over MMR output.
///
/// The LLM tier runs only when all of the following hold: `use_llm` with an
/// adapter provided, at least two heuristic survivors carrying a rerank
/// signal, a positive budget, and surviving text at or above the trigger
/// share of `max_context`.
pub async fn compress_docs(
    query: &str,
    query_tokens: &[String],
    docs: &[Document],
    filter: Option<&EmbeddingsFilter>,
    llm: Option<&dyn LlmCompressor>,
    opts: &CompressOptions,
) -> Result<CompressOutcome> {
    let cfg = HeuristicCompressorConfig {
        max_context: opts.max_context,
        keyword_keep_limit: opts.settings.keyword_keep_limit,
        min_docs_after_filter: opts.settings.min_docs_after_filter,
        thresholds: chat_worker_config::constants::compress::ADAPTIVE_THRESHOLDS,
        fallback_keep: opts.settings.fallback_keep,
    };

    let heuristic = HeuristicCompressor::new(filter, cfg);
    let kept = heuristic.compress_docs(query, query_tokens, docs).await;
    let heuristic_hits = kept.len();

    let Some(llm) = llm.filter(|_| opts.use_llm) else {
        return Ok(CompressOutcome {
            docs: kept,
            heuristic_hits,
            llm_applied: false,
        });
    };

    let budget = opts.max_context.unwrap_or(0);
    let has_rerank = kept
        .iter()
        .any(|d| d.metadata.contains_key("rerank_score"));
    let kept_chars = total_chars(&kept);
    let trigger_chars = (budget as f64 * opts.settings.llm_trigger_ratio) as usize;

    let should_run = kept.len() >= 2 && budget > 0 && has_rerank && kept_chars >= trigger_chars;
    if !should_run {
        debug!(
            kept = kept.len(),
            budget,
            has_rerank,
            kept_chars,
            trigger_chars,
            "llm compress tier skipped"
        );
        return Ok(CompressOutcome {
            docs: kept,
            heuristic_hits,
            llm_applied: false,
        });
    }

    match llm.compress(query, kept.clone()).await {
        Ok(compressed) => {
            let changed = compressed.len() != kept.len()
                || compressed
                    .iter()
                    .zip(kept.iter())
                    .any(|(after, before)| after.page_content != before.page_content);
            Ok(CompressOutcome {
                docs: compressed,
                heuristic_hits,
                llm_applied: changed,
            })
        }
        Err(e) if opts.settings.fail_open => {
            warn!("llm compress tier failed, keeping heuristic output: {e}");
            Ok(CompressOutcome {
                docs: kept,
                heuristic_hits,
                llm_applied: false,
            })
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct ReplacingCompressor;

    #[async_trait]
    impl LlmCompressor for ReplacingCompressor {
        async fn compress(&self, _query: &str, docs: Vec<Document>) -> Result<Vec<Document>> {
            Ok(docs
                .into_iter()
                .map(|mut d| {
                    d.page_content = "compressed".to_string();
                    d.metadata.insert("compressed".into(), json!(true));
                    d
                })
                .collect())
        }
    }

    struct IdentityCompressor;

    #[async_trait]
    impl LlmCompressor for IdentityCompressor {
        async fn compress(&self, _query: &str, docs: Vec<Document>) -> Result<Vec<Document>> {
            Ok(docs)
        }
    }

    struct FailingCompressor;

    #[async_trait]
    impl LlmCompressor for FailingCompressor {
        async fn compress(&self, _query: &str, _docs: Vec<Document>) -> Result<Vec<Document>> {
            Err(chat_worker_core::Error::Compress("down".to_string()))
        }
    }

    fn reranked_doc(id: &str, content: &str, rerank: f64) -> Document {
        let mut d = Document::new(content);
        d.metadata.insert("chunk_id".into(), json!(id));
        d.metadata.insert("rerank_score".into(), json!(rerank));
        d
    }

    fn opts(max_context: Option<usize>, use_llm: bool) -> CompressOptions {
        CompressOptions {
            max_context,
            use_llm,
            settings: CompressSettings::default(),
        }
    }

    #[tokio::test]
    async fn test_heuristic_only_without_llm() {
        let docs = vec![reranked_doc("c1", "alpha", 0.9)];
        let out = compress_docs("q", &[], &docs, None, None, &opts(Some(100), true))
            .await
            .unwrap();
        assert_eq!(out.heuristic_hits, 1);
        assert!(!out.llm_applied);
    }

    #[tokio::test]
    async fn test_llm_tier_triggers_on_large_context() {
        // two docs, 80 chars total, budget 100 -> 80 >= 70 triggers
        let docs = vec![
            reranked_doc("c1", &"a".repeat(40), 0.9),
            reranked_doc("c2", &"b".repeat(40), 0.8),
        ];
        let llm = ReplacingCompressor;
        let out = compress_docs("q", &[], &docs, None, Some(&llm), &opts(Some(100), true))
            .await
            .unwrap();
        assert!(out.llm_applied);
        assert!(out.docs.iter().all(|d| d.page_content == "compressed"));
        assert_eq!(out.heuristic_hits, 2);
    }

    #[tokio::test]
    async fn test_llm_tier_skipped_below_trigger_share() {
        // 20 chars vs budget 1000 -> below the 70% trigger
        let docs = vec![
            reranked_doc("c1", &"a".repeat(10), 0.9),
            reranked_doc("c2", &"b".repeat(10), 0.8),
        ];
        let llm = ReplacingCompressor;
        let out = compress_docs("q", &[], &docs, None, Some(&llm), &opts(Some(1000), true))
            .await
            .unwrap();
        assert!(!out.llm_applied);
        assert!(out.docs[0].page_content.starts_with('a'));
    }

    #[tokio::test]
    async fn test_llm_tier_requires_rerank_signal() {
        let mut d1 = Document::new(&*"a".repeat(40));
        d1.metadata.insert("chunk_id".into(), json!("c1"));
        d1.metadata.insert("score".into(), json!(0.9));
        let mut d2 = Document::new(&*"b".repeat(40));
        d2.metadata.insert("chunk_id".into(), json!("c2"));
        d2.metadata.insert("score".into(), json!(0.8));
        let llm = ReplacingCompressor;
        let out = compress_docs("q", &[], &[d1, d2], None, Some(&llm), &opts(Some(100), true))
            .await
            .unwrap();
        assert!(!out.llm_applied);
    }

    #[tokio::test]
    async fn test_llm_tier_requires_two_docs() {
        let docs = vec![reranked_doc("c1", &"a".repeat(90), 0.9)];
        let llm = ReplacingCompressor;
        let out = compress_docs("q", &[], &docs, None, Some(&llm), &opts(Some(100), true))
            .await
            .unwrap();
        assert!(!out.llm_applied);
    }

    #[tokio::test]
    async fn test_llm_applied_false_when_nothing_changed() {
        let docs = vec![
            reranked_doc("c1", &"a".repeat(40), 0.9),
            reranked_doc("c2", &"b".repeat(40), 0.8),
        ];
        let llm = IdentityCompressor;
        let out = compress_docs("q", &[], &docs, None, Some(&llm), &opts(Some(100), true))
            .await
            .unwrap();
        assert!(!out.llm_applied);
    }

    #[tokio::test]
    async fn test_llm_failure_fail_open_keeps_heuristic() {
        let docs = vec![
            reranked_doc("c1", &"a".repeat(40), 0.9),
            reranked_doc("c2", &"b".repeat(40), 0.8),
        ];
        let llm = FailingCompressor;
        let out = compress_docs("q", &[], &docs, None, Some(&llm), &opts(Some(100), true))
            .await
            .unwrap();
        assert!(!out.llm_applied);
        assert_eq!(out.docs.len(), 2);
    }

    #[tokio::test]
    async fn test_llm_failure_fail_closed_propagates() {
        let docs = vec![
            reranked_doc("c1", &"a".repeat(40), 0.9),
            reranked_doc("c2", &"b".repeat(40), 0.8),
        ];
        let llm = FailingCompressor;
        let mut options = opts(Some(100), true);
        options.settings.fail_open = false;
        let out = compress_docs("q", &[], &docs, None, Some(&llm), &options).await;
        assert!(out.is_err());
    }

    #[tokio::test]
    async fn test_use_llm_false_skips_tier() {
        let docs = vec![
            reranked_doc("c1", &"a".repeat(40), 0.9),
            reranked_doc("c2", &"b".repeat(40), 0.8),
        ];
        let llm = ReplacingCompressor;
        let out = compress_docs("q", &[], &docs, None, Some(&llm), &opts(Some(100), false))
            .await
            .unwrap();
        assert!(!out.llm_applied);
    }
}
