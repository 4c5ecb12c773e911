//! Heuristic document compressor
//!
//! First tier of compression: embedding filter with adaptive thresholds,
//! keyword guard, anchor preservation, and a strict context budget.
//! Preserves original scores and ranks so ordering signals survive.

use std::collections::HashSet;

use tracing::{debug, warn};

use chat_worker_core::{doc_rank, doc_rerank_score, doc_score, stable_key, Document, StableKey};
use chat_worker_config::constants::compress;

use crate::embedding_filter::EmbeddingsFilter;
use crate::matching::kw_hit;

#[derive(Debug, Clone)]
pub struct HeuristicCompressorConfig {
    pub max_context: Option<usize>,
    pub keyword_keep_limit: usize,
    pub min_docs_after_filter: usize,
    pub thresholds: [f64; 3],
    pub fallback_keep: usize,
}

impl HeuristicCompressorConfig {
    pub fn new(max_context: Option<usize>) -> Self {
        Self {
            max_context,
            keyword_keep_limit: compress::KEYWORD_KEEP_LIMIT,
            min_docs_after_filter: compress::MIN_DOCS_AFTER_FILTER,
            thresholds: compress::ADAPTIVE_THRESHOLDS,
            fallback_keep: compress::FALLBACK_KEEP,
        }
    }
}

pub struct HeuristicCompressor<'a> {
    filter: Option<&'a EmbeddingsFilter>,
    cfg: HeuristicCompressorConfig,
}

impl<'a> HeuristicCompressor<'a> {
    pub fn new(filter: Option<&'a EmbeddingsFilter>, cfg: HeuristicCompressorConfig) -> Self {
        Self { filter, cfg }
    }

    /// Compress retrieved documents while preserving original scores and
    /// ranks. Returns an ordered subset for prompt context.
    pub async fn compress_docs(
        &self,
        query: &str,
        query_tokens: &[String],
        docs: &[Document],
    ) -> Vec<Document> {
        let docs: Vec<Document> = docs.to_vec();

        // Detect rerank results and record rerank order for tie-breaking.
        let mut has_rerank = false;
        let mut rerank_pos: Vec<(StableKey, usize)> = Vec::new();
        for (i, d) in docs.iter().enumerate() {
            let k = stable_key(d);
            if !rerank_pos.iter().any(|(key, _)| *key == k) {
                rerank_pos.push((k, i));
            }
            if d.metadata.contains_key("rerank_score") {
                has_rerank = true;
            }
        }
        debug!(input = docs.len(), has_rerank, "compress start");

        // Keyword guard: up to N strong hits in original order.
        let mut must_keep: Vec<usize> = Vec::new();
        for (i, d) in docs.iter().enumerate() {
            if must_keep.len() >= self.cfg.keyword_keep_limit {
                break;
            }
            if kw_hit(query_tokens, d) {
                must_keep.push(i);
            }
        }

        // Embedding filter with adaptive threshold; relax until enough
        // docs survive, give up entirely on the first failure.
        let mut filtered: Option<Vec<Document>> = None;
        let mut used_thresh: f64 = -1.0;
        if let Some(filter_util) = self.filter {
            for &th in &self.cfg.thresholds {
                match filter_util.with_threshold(th).filter(query, &docs).await {
                    Ok(out) if out.len() >= self.cfg.min_docs_after_filter => {
                        filtered = Some(out);
                        used_thresh = th;
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("compressor embedding filter failed (th={th}): {e}");
                        filtered = None;
                        break;
                    }
                }
            }
        }
        let filtered = filtered.unwrap_or_else(|| docs.clone());

        // Kept set: anchor, then keyword guard, then filtered results, all
        // deduplicated by stable key in that order.
        let mut keep_set: HashSet<StableKey> = HashSet::new();
        let mut kept: Vec<Document> = Vec::new();

        if let Some(anchor) = docs.first() {
            keep_set.insert(stable_key(anchor));
            kept.push(anchor.clone());
        }
        for &i in &must_keep {
            let k = stable_key(&docs[i]);
            if keep_set.insert(k) {
                kept.push(docs[i].clone());
            }
        }
        for d in &filtered {
            let k = stable_key(d);
            if keep_set.insert(k) {
                kept.push(d.clone());
            }
        }

        // Restore stable order, preferring rerank scores when available.
        if has_rerank {
            let pos = |d: &Document| -> usize {
                let k = stable_key(d);
                rerank_pos
                    .iter()
                    .find(|(key, _)| *key == k)
                    .map(|(_, i)| *i)
                    .unwrap_or(usize::MAX)
            };
            kept.sort_by(|a, b| {
                doc_rerank_score(b)
                    .partial_cmp(&doc_rerank_score(a))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| pos(a).cmp(&pos(b)))
            });
        } else {
            kept.sort_by(|a, b| {
                doc_score(b)
                    .partial_cmp(&doc_score(a))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| doc_rank(a).cmp(&doc_rank(b)))
            });
        }

        // Trim to the context budget; docs that would overflow are skipped
        // without reordering.
        let mut out: Vec<Document> = Vec::new();
        let mut total = 0usize;
        for d in &kept {
            let ln = d.page_content.chars().count();
            if let Some(budget) = self.cfg.max_context {
                if total + ln > budget {
                    continue;
                }
            }
            out.push(d.clone());
            total += ln;
        }

        // Guarantee at least a small set.
        if out.is_empty() {
            out = kept
                .iter()
                .take(self.cfg.fallback_keep.min(kept.len()))
                .cloned()
                .collect();
        }

        debug!(
            input = docs.len(),
            used_thresh,
            kw_keep = must_keep.len(),
            output = out.len(),
            "compress done"
        );

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, content: &str, score: Option<f64>) -> Document {
        let mut d = Document::new(content);
        d.metadata.insert("chunk_id".into(), json!(id));
        if let Some(s) = score {
            d.metadata.insert("score".into(), json!(s));
        }
        d
    }

    fn cfg(max_context: Option<usize>) -> HeuristicCompressorConfig {
        HeuristicCompressorConfig::new(max_context)
    }

    #[tokio::test]
    async fn test_anchor_always_kept() {
        let docs = vec![doc("c1", "anchor text", Some(0.1)), doc("c2", "other", Some(0.9))];
        let compressor = HeuristicCompressor::new(None, cfg(None));
        let out = compressor.compress_docs("q", &[], &docs).await;
        assert!(out.iter().any(|d| d.meta_str("chunk_id") == Some("c1")));
    }

    #[tokio::test]
    async fn test_sort_by_score_without_rerank() {
        let docs = vec![
            doc("c1", "low", Some(0.2)),
            doc("c2", "high", Some(0.9)),
            doc("c3", "mid", Some(0.5)),
        ];
        let compressor = HeuristicCompressor::new(None, cfg(None));
        let out = compressor.compress_docs("q", &[], &docs).await;
        let ids: Vec<&str> = out.iter().filter_map(|d| d.meta_str("chunk_id")).collect();
        assert_eq!(ids, vec!["c2", "c3", "c1"]);
    }

    #[tokio::test]
    async fn test_sort_by_rerank_when_present() {
        let mut d1 = doc("c1", "a", Some(0.9));
        d1.metadata.insert("rerank_score".into(), json!(0.2));
        let mut d2 = doc("c2", "b", Some(0.1));
        d2.metadata.insert("rerank_score".into(), json!(0.8));
        let compressor = HeuristicCompressor::new(None, cfg(None));
        let out = compressor.compress_docs("q", &[], &[d1, d2]).await;
        let ids: Vec<&str> = out.iter().filter_map(|d| d.meta_str("chunk_id")).collect();
        assert_eq!(ids, vec!["c2", "c1"]);
    }

    #[tokio::test]
    async fn test_budget_trim_skips_oversized() {
        let docs = vec![
            doc("c1", "abcd", Some(0.9)),
            doc("c2", "efghijkl", Some(0.8)),
            doc("c3", "mn", Some(0.7)),
        ];
        let compressor = HeuristicCompressor::new(None, cfg(Some(7)));
        let out = compressor.compress_docs("q", &[], &docs).await;
        let ids: Vec<&str> = out.iter().filter_map(|d| d.meta_str("chunk_id")).collect();
        // c2 would overflow (4+8 > 7) and is skipped; c3 still fits (4+2 <= 7)
        assert_eq!(ids, vec!["c1", "c3"]);
    }

    #[tokio::test]
    async fn test_fallback_keep_when_budget_too_small() {
        let docs = vec![doc("c1", "abcdefgh", Some(0.9)), doc("c2", "ijklmnop", Some(0.8))];
        let compressor = HeuristicCompressor::new(None, cfg(Some(2)));
        let out = compressor.compress_docs("q", &[], &docs).await;
        // nothing fits, so the first fallback_keep docs come back
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_keyword_guard_limit() {
        let mut config = cfg(None);
        config.keyword_keep_limit = 1;
        let docs = vec![
            doc("c1", "nothing here", Some(0.5)),
            doc("c2", "keyword match", Some(0.4)),
            doc("c3", "keyword again", Some(0.3)),
        ];
        let compressor = HeuristicCompressor::new(None, config);
        let toks = vec!["keyword".to_string()];
        let out = compressor.compress_docs("q", &toks, &docs).await;
        // guard picks only c2, but filtered fallback keeps everything anyway
        assert_eq!(out.len(), 3);
    }

    #[tokio::test]
    async fn test_dedup_by_stable_key() {
        let d = doc("same", "text", Some(0.5));
        let docs = vec![d.clone(), d.clone()];
        let compressor = HeuristicCompressor::new(None, cfg(None));
        let out = compressor.compress_docs("q", &[], &docs).await;
        assert_eq!(out.len(), 1);
    }
}
