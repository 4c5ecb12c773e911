//! MMR (Maximal Marginal Relevance) postprocessor
//!
//! Pure selection over already-retrieved candidates: balances relevance
//! against similarity to what was already picked. When embeddings are
//! missing the pairwise similarity is 0 and MMR degenerates to relevance
//! order.

use std::collections::HashMap;

use serde_json::json;
use tracing::debug;

use chat_worker_core::Document;

/// MMR configuration.
///
/// `lambda_mult`: 1.0 = pure relevance, 0.0 = pure diversity.
/// `fetch_k`: how many candidates to consider from the input list.
/// `similarity_threshold`: candidates too similar to an already-selected
/// item are skipped entirely.
#[derive(Debug, Clone, PartialEq)]
pub struct MmrConfig {
    pub lambda_mult: f64,
    pub k: usize,
    pub fetch_k: usize,
    pub similarity_threshold: Option<f64>,
}

impl Default for MmrConfig {
    fn default() -> Self {
        Self {
            lambda_mult: 0.7,
            k: 6,
            fetch_k: 24,
            similarity_threshold: Some(0.85),
        }
    }
}

/// Relevance value for a candidate: finite `rerank_score` first, then the
/// retrieval score chain.
fn relevance_value(d: &Document) -> Option<f64> {
    if let Some(rr) = d.meta_f64("rerank_score") {
        return Some(rr);
    }
    if let Some(s) = d.score.filter(|s| s.is_finite()) {
        return Some(s);
    }
    if let Some(s) = d.meta_f64("__orig_score") {
        return Some(s);
    }
    d.meta_f64("score")
}

/// Precompute relevance for every candidate.
///
/// Docs without any score but with a `distance` get a min-max normalized
/// similarity across the candidate set; everything else defaults to 0.
fn default_rel_scores(candidates: &[Document]) -> HashMap<usize, f64> {
    let mut rel_scores: HashMap<usize, f64> = HashMap::new();
    let mut dist_scores: HashMap<usize, f64> = HashMap::new();

    for (i, d) in candidates.iter().enumerate() {
        if let Some(rel) = relevance_value(d) {
            rel_scores.insert(i, rel);
            continue;
        }
        if let Some(dist) = d.meta_f64("distance") {
            dist_scores.insert(i, dist);
        }
    }

    if !dist_scores.is_empty() {
        let min_d = dist_scores.values().cloned().fold(f64::INFINITY, f64::min);
        let max_d = dist_scores
            .values()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        let denom = max_d - min_d;
        for (i, dist) in dist_scores {
            let rel = if denom <= 0.0 {
                1.0
            } else {
                ((max_d - dist) / denom).clamp(0.0, 1.0)
            };
            rel_scores.insert(i, rel);
        }
    }

    for i in 0..candidates.len() {
        rel_scores.entry(i).or_insert(0.0);
    }
    rel_scores
}

/// Cosine similarity in [-1, 1]; 0 when either vector has no magnitude.
fn safe_cosine(a: &[f64], b: &[f64]) -> f64 {
    let mut dot = 0.0;
    let mut na = 0.0;
    let mut nb = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na <= 0.0 || nb <= 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Select up to `k` documents using MMR.
///
/// An optional `similarity_fn` overrides the embedding-based cosine
/// similarity. Returns selected docs in selection order, annotated with
/// `mmr_rank` (1-based) and `mmr_lambda`.
pub fn mmr_select(
    docs: &[Document],
    cfg: &MmrConfig,
    similarity_fn: Option<&dyn Fn(&Document, &Document) -> f64>,
) -> Vec<Document> {
    if docs.is_empty() || cfg.k == 0 {
        return Vec::new();
    }

    let fetch_k = cfg.fetch_k.max(cfg.k);
    let candidates: Vec<Document> = docs.iter().take(fetch_k).cloned().collect();

    let rel_scores = default_rel_scores(&candidates);

    let embeddings: Vec<Option<Vec<f64>>> = if similarity_fn.is_none() {
        let vecs: Vec<Option<Vec<f64>>> =
            candidates.iter().map(|d| d.embedding_vector()).collect();
        let with_emb = vecs.iter().filter(|v| v.is_some()).count();
        debug!(
            with_embeddings = with_emb,
            total = vecs.len(),
            "mmr embedding availability"
        );
        vecs
    } else {
        Vec::new()
    };

    let sim = |i: usize, j: usize| -> f64 {
        match similarity_fn {
            Some(f) => f(&candidates[i], &candidates[j]),
            None => match (&embeddings[i], &embeddings[j]) {
                (Some(a), Some(b)) => safe_cosine(a, b),
                _ => 0.0,
            },
        }
    };

    // Start with the most relevant item; ties keep the earliest candidate.
    let mut selected: Vec<usize> = Vec::new();
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut first = 0usize;
    for &i in &remaining {
        if rel_scores[&i] > rel_scores[&first] {
            first = i;
        }
    }
    selected.push(first);
    remaining.retain(|&i| i != first);

    while !remaining.is_empty() && selected.len() < cfg.k {
        let mut best_i: Option<usize> = None;
        let mut best_score = f64::NEG_INFINITY;

        for &i in &remaining {
            let mut max_sim: f64 = 0.0;
            for &s in &selected {
                max_sim = max_sim.max(sim(i, s));
            }

            if let Some(threshold) = cfg.similarity_threshold {
                if max_sim >= threshold {
                    continue;
                }
            }

            let score = cfg.lambda_mult * rel_scores[&i] - (1.0 - cfg.lambda_mult) * max_sim;
            if score > best_score {
                best_score = score;
                best_i = Some(i);
            }
        }

        let Some(best_i) = best_i else { break };
        selected.push(best_i);
        remaining.retain(|&i| i != best_i);
    }

    let mut out: Vec<Document> = selected
        .iter()
        .map(|&i| candidates[i].clone())
        .collect();
    for (rank, d) in out.iter_mut().enumerate() {
        d.metadata.insert("mmr_rank".into(), json!(rank + 1));
        d.metadata.insert("mmr_lambda".into(), json!(cfg.lambda_mult));
    }

    debug!(
        input = docs.len(),
        fetch_k,
        output = out.len(),
        lambda = cfg.lambda_mult,
        "mmr selection done"
    );

    out
}
