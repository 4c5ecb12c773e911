//! Embedding-similarity document filter
//!
//! Keeps documents whose similarity to the query embedding meets a
//! threshold. Stored vectors from retrieval are reused when present;
//! otherwise the document bodies are embedded through the port.

use std::sync::Arc;

use tracing::debug;

use chat_worker_core::{Document, Embeddings, Result};

pub struct EmbeddingsFilter {
    embeddings: Arc<dyn Embeddings>,
    similarity_threshold: f64,
}

impl EmbeddingsFilter {
    pub fn new(embeddings: Arc<dyn Embeddings>, similarity_threshold: f64) -> Self {
        Self {
            embeddings,
            similarity_threshold,
        }
    }

    /// Same filter at a different threshold (used by the adaptive pass).
    pub fn with_threshold(&self, similarity_threshold: f64) -> Self {
        Self {
            embeddings: Arc::clone(&self.embeddings),
            similarity_threshold,
        }
    }

    /// Filter documents by query similarity, preserving input order.
    pub async fn filter(&self, query: &str, docs: &[Document]) -> Result<Vec<Document>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self.embeddings.embed_query(query).await?;

        // Reuse stored vectors; batch-embed the rest.
        let mut vectors: Vec<Option<Vec<f64>>> =
            docs.iter().map(|d| d.embedding_vector()).collect();
        let missing: Vec<usize> = vectors
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.is_none().then_some(i))
            .collect();
        if !missing.is_empty() {
            let texts: Vec<String> = missing
                .iter()
                .map(|&i| docs[i].page_content.clone())
                .collect();
            let embedded = self.embeddings.embed_documents(&texts).await?;
            for (slot, vec) in missing.into_iter().zip(embedded) {
                vectors[slot] = Some(vec);
            }
        }

        let mut kept = Vec::new();
        for (doc, vec) in docs.iter().zip(vectors) {
            let sim = vec.map(|v| cosine(&query_vec, &v)).unwrap_or(0.0);
            if sim >= self.similarity_threshold {
                kept.push(doc.clone());
            }
        }

        debug!(
            input = docs.len(),
            kept = kept.len(),
            threshold = self.similarity_threshold,
            "embedding filter applied"
        );
        Ok(kept)
    }
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
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

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    /// Maps known words onto fixed axes so similarities are predictable.
    struct AxisEmbedder;

    #[async_trait]
    impl Embeddings for AxisEmbedder {
        async fn embed_query(&self, text: &str) -> Result<Vec<f64>> {
            Ok(axis(text))
        }

        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
            Ok(texts.iter().map(|t| axis(t)).collect())
        }
    }

    fn axis(text: &str) -> Vec<f64> {
        if text.contains("loan") {
            vec![1.0, 0.0]
        } else {
            vec![0.0, 1.0]
        }
    }

    #[tokio::test]
    async fn test_filter_keeps_similar_docs() {
        let filter = EmbeddingsFilter::new(Arc::new(AxisEmbedder), 0.5);
        let docs = vec![Document::new("loan terms"), Document::new("unrelated")];
        let kept = filter.filter("loan", &docs).await.unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].page_content, "loan terms");
    }

    #[tokio::test]
    async fn test_filter_prefers_stored_vectors() {
        let filter = EmbeddingsFilter::new(Arc::new(AxisEmbedder), 0.5);
        // Body says "unrelated" but the stored vector matches the query axis.
        let mut d = Document::new("unrelated");
        d.metadata.insert("vector".into(), json!([1.0, 0.0]));
        let kept = filter.filter("loan", &[d]).await.unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_threshold_keeps_all() {
        let filter = EmbeddingsFilter::new(Arc::new(AxisEmbedder), 0.0);
        let docs = vec![Document::new("loan"), Document::new("other")];
        let kept = filter.filter("loan", &docs).await.unwrap();
        assert_eq!(kept.len(), 2);
    }
}
