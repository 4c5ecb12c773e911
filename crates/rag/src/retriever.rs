//! Backend retriever with multi-query fan-out
//!
//! Expands the question into up to `mmq` variants and issues one backend
//! call per variant, concurrently. Results merge preserving first-seen
//! order by merge key, with the deterministic variant order deciding which
//! duplicate survives. A missing text field triggers one fallback pass
//! over alternative field names; the first working field is remembered for
//! subsequent calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use chat_worker_core::{
    merge_key, Document, Error, Result, SearchBackend, SearchHit, SearchMode, SearchRequest,
};
use chat_worker_config::{RagSettings, SearchType};

use crate::filters::normalize_filters;
use crate::query::{expand_queries, kw_tokens_split};

/// Retriever configuration, typically derived from [`RagSettings`].
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub collection: String,
    pub text_key: String,
    pub top_k: usize,
    pub mmq: usize,
    pub search_type: SearchMode,
    pub alpha: f64,
    pub alpha_multi_strong_max: Option<f64>,
    pub alpha_single_strong_min: Option<f64>,
    pub alpha_weak_hit_min: Option<f64>,
    pub alpha_no_bm25_min: Option<f64>,
    pub near_text_distance: f64,
    pub bm25_query_properties: Vec<String>,
    pub fallback_text_keys: Vec<String>,
    pub stopwords: Vec<String>,
    /// Deadline for a single backend call, in milliseconds
    pub timeout_ms: Option<u64>,
}

impl From<&RagSettings> for RetrieverConfig {
    fn from(settings: &RagSettings) -> Self {
        Self {
            collection: settings.collection.clone(),
            text_key: settings.text_key.clone(),
            top_k: settings.top_k,
            mmq: settings.mmq,
            search_type: match settings.search_type {
                SearchType::Hybrid => SearchMode::Hybrid,
                SearchType::NearText => SearchMode::NearText,
            },
            alpha: settings.alpha,
            alpha_multi_strong_max: settings.alpha_multi_strong_max,
            alpha_single_strong_min: settings.alpha_single_strong_min,
            alpha_weak_hit_min: settings.alpha_weak_hit_min,
            alpha_no_bm25_min: settings.alpha_no_bm25_min,
            near_text_distance: settings.near_text_distance,
            bm25_query_properties: settings.bm25_query_properties.clone(),
            fallback_text_keys: settings.fallback_text_keys.clone(),
            stopwords: settings.ko_stop_tokens.clone(),
            timeout_ms: settings.search_timeout_ms,
        }
    }
}

/// Per-request retrieval overrides.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    pub top_k: Option<usize>,
    pub mmq: Option<usize>,
    pub filters: Option<HashMap<String, Value>>,
    pub search_type: Option<SearchMode>,
    pub alpha: Option<f64>,
}

/// Retriever over a [`SearchBackend`] port.
pub struct BackendRetriever {
    backend: Arc<dyn SearchBackend>,
    config: RetrieverConfig,
    /// Working text field discovered by the schema fallback pass.
    /// Set at most once per instance, then reused for every later call.
    remembered_text_key: RwLock<Option<String>>,
}

impl BackendRetriever {
    pub fn new(backend: Arc<dyn SearchBackend>, config: RetrieverConfig) -> Self {
        Self {
            backend,
            config,
            remembered_text_key: RwLock::new(None),
        }
    }

    /// Effective text field: remembered fallback first, then configuration.
    fn text_key(&self) -> String {
        self.remembered_text_key
            .read()
            .clone()
            .unwrap_or_else(|| self.config.text_key.clone())
    }

    /// Expand the query and retrieve per variant, merging by merge key.
    pub async fn retrieve(&self, query: &str, opts: &RetrieveOptions) -> Result<Vec<Document>> {
        if query.trim().is_empty() {
            return Err(Error::InvalidInput("empty query".to_string()));
        }

        let top_k = opts.top_k.unwrap_or(self.config.top_k).max(1);
        let mmq = opts.mmq.unwrap_or(self.config.mmq);
        let mode = opts.search_type.unwrap_or(self.config.search_type);
        let filters = opts
            .filters
            .as_ref()
            .and_then(normalize_filters);

        let variants = expand_queries(query, mmq, &self.config.stopwords);
        if variants.len() > 1 {
            info!(mmq, queries = variants.len(), "multi-query retrieval");
            debug!(?variants, "query variants");
        }

        let alpha = match opts.alpha {
            // an explicit per-request alpha wins untouched
            Some(alpha) => alpha,
            None => self.dynamic_alpha(query),
        };

        // One concurrent call per variant; try_join_all keeps results in
        // variant order, so the merge stays deterministic.
        let docs_by_query: Vec<Vec<Document>> =
            try_join_all(variants.iter().map(|variant| {
                let filters = filters.clone();
                async move {
                    let (hits, text_field) = self
                        .search_with_fallback(variant, mode, top_k, filters, alpha)
                        .await?;
                    Ok::<Vec<Document>, Error>(hits_to_docs(hits, &text_field))
                }
            }))
            .await?;

        let limit = top_k * variants.len();
        Ok(merge_docs(&docs_by_query, limit))
    }

    /// Dynamic-alpha heuristic: monotone clamps on the configured base
    /// alpha, driven by how many strong (rare) keyword tokens the query
    /// carries. Bounds left unset disable the corresponding clamp.
    fn dynamic_alpha(&self, query: &str) -> f64 {
        let cfg = &self.config;
        if cfg.search_type != SearchMode::Hybrid {
            return cfg.alpha;
        }
        let (toks, rare) = kw_tokens_split(query, &cfg.stopwords);

        let mut alpha = cfg.alpha;
        if rare.len() >= 2 {
            if let Some(max) = cfg.alpha_multi_strong_max {
                alpha = alpha.min(max);
            }
        } else if rare.len() == 1 {
            if let Some(min) = cfg.alpha_single_strong_min {
                alpha = alpha.max(min);
            }
        } else if !toks.is_empty() {
            if let Some(min) = cfg.alpha_weak_hit_min {
                alpha = alpha.max(min);
            }
        } else if let Some(min) = cfg.alpha_no_bm25_min {
            alpha = alpha.max(min);
        }

        if (alpha - cfg.alpha).abs() > f64::EPSILON {
            debug!(
                base = cfg.alpha,
                effective = alpha,
                rare = rare.len(),
                tokens = toks.len(),
                "dynamic alpha applied"
            );
        }
        alpha.clamp(0.0, 1.0)
    }

    /// One backend call, retrying once per fallback text field on a
    /// schema error. Returns the hits together with the field that worked.
    async fn search_with_fallback(
        &self,
        query: &str,
        mode: SearchMode,
        top_k: usize,
        filters: Option<chat_worker_core::WhereFilter>,
        alpha: f64,
    ) -> Result<(Vec<SearchHit>, String)> {
        let primary = self.text_key();
        match self
            .search_once(query, mode, top_k, filters.clone(), alpha, &primary)
            .await
        {
            Ok(hits) => Ok((hits, primary)),
            Err(Error::Schema(missing)) => {
                warn!(field = %missing, "text field missing, trying fallbacks");
                let mut last_err = Error::Schema(missing);
                for tk in &self.config.fallback_text_keys {
                    if tk.is_empty() || *tk == primary {
                        continue;
                    }
                    match self
                        .search_once(query, mode, top_k, filters.clone(), alpha, tk)
                        .await
                    {
                        Ok(hits) => {
                            let mut remembered = self.remembered_text_key.write();
                            if remembered.is_none() {
                                info!(field = %tk, "remembering working text field");
                                *remembered = Some(tk.clone());
                            }
                            return Ok((hits, tk.clone()));
                        }
                        Err(err @ Error::Schema(_)) => {
                            last_err = err;
                            continue;
                        }
                        Err(err) => return Err(err),
                    }
                }
                Err(last_err)
            }
            Err(err) => Err(err),
        }
    }

    async fn search_once(
        &self,
        query: &str,
        mode: SearchMode,
        top_k: usize,
        filters: Option<chat_worker_core::WhereFilter>,
        alpha: f64,
        text_field: &str,
    ) -> Result<Vec<SearchHit>> {
        let request = SearchRequest {
            mode,
            collection: self.config.collection.clone(),
            text_field: text_field.to_string(),
            query: query.to_string(),
            top_k,
            filters,
            alpha: (mode == SearchMode::Hybrid).then_some(alpha),
            distance: (mode == SearchMode::NearText).then_some(self.config.near_text_distance),
            bm25_properties: self.config.bm25_query_properties.clone(),
            include_vector: true,
        };

        match self.config.timeout_ms {
            Some(ms) => tokio::time::timeout(
                Duration::from_millis(ms),
                self.backend.search(&request),
            )
            .await
            .map_err(|_| Error::Cancelled)?,
            None => self.backend.search(&request).await,
        }
    }
}

/// Map backend hits to documents, annotating ranking signals.
fn hits_to_docs(hits: Vec<SearchHit>, text_field: &str) -> Vec<Document> {
    hits.into_iter()
        .enumerate()
        .map(|(rank, hit)| {
            let mut d = Document::default();

            for (key, value) in &hit.properties {
                if *key == text_field {
                    if let Value::String(s) = value {
                        d.page_content = s.clone();
                    }
                    continue;
                }
                d.metadata.insert(key.clone(), value.clone());
            }

            d.chunk_id = d.meta_str("chunk_id").map(str::to_string);
            d.file_id = d.meta_str("file_id").map(str::to_string);
            d.chunk_index = d.meta_i64("chunk_index");
            d.page = d.meta_i64("page");
            d.title = d.meta_str("filename").map(str::to_string);

            if let Some(id) = hit.id {
                d.metadata.insert("weaviate_id".into(), json!(id));
            }
            if let Some(score) = hit.score.filter(|s| s.is_finite()) {
                d.metadata.insert("score".into(), json!(score));
            }
            if let Some(distance) = hit.distance.filter(|s| s.is_finite()) {
                d.metadata.insert("distance".into(), json!(distance));
            }
            if let Some(vector) = hit.vector {
                d.metadata.insert("vector".into(), json!(vector));
            }
            d.metadata.insert("__orig_rank".into(), json!(rank));

            d
        })
        .collect()
}

/// Merge per-variant results preserving first-seen order by merge key.
pub fn merge_docs(docs_by_query: &[Vec<Document>], limit: usize) -> Vec<Document> {
    let mut merged: Vec<Document> = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    for docs in docs_by_query {
        for d in docs {
            let key = merge_key(d);
            if !seen.insert(key) {
                continue;
            }
            merged.push(d.clone());
            if merged.len() >= limit {
                return merged;
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn hit(chunk_id: &str, text: &str, score: f64) -> SearchHit {
        let mut properties = HashMap::new();
        properties.insert("text".to_string(), json!(text));
        properties.insert("chunk_id".to_string(), json!(chunk_id));
        properties.insert("filename".to_string(), json!("file.pdf"));
        SearchHit {
            id: Some(format!("uuid-{chunk_id}")),
            properties,
            score: Some(score),
            distance: None,
            vector: Some(vec![1.0, 0.0]),
        }
    }

    /// Backend scripted per call; records issued requests.
    struct ScriptedBackend {
        responses: Mutex<Vec<Result<Vec<SearchHit>>>>,
        requests: Mutex<Vec<SearchRequest>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<Result<Vec<SearchHit>>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SearchBackend for ScriptedBackend {
        async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
            self.requests.lock().push(request.clone());
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Ok(Vec::new())
            } else {
                responses.remove(0)
            }
        }
    }

    fn config() -> RetrieverConfig {
        RetrieverConfig::from(&RagSettings::default())
    }

    fn retriever(
        responses: Vec<Result<Vec<SearchHit>>>,
        mut cfg: RetrieverConfig,
    ) -> (BackendRetriever, Arc<ScriptedBackend>) {
        cfg.stopwords = Vec::new();
        let backend = Arc::new(ScriptedBackend::new(responses));
        (BackendRetriever::new(backend.clone(), cfg), backend)
    }

    #[tokio::test]
    async fn test_dedup_across_variants() {
        let (r, _backend) = retriever(
            vec![
                Ok(vec![hit("c1", "one", 0.9), hit("c2", "two", 0.8)]),
                Ok(vec![hit("c2", "two", 0.8), hit("c3", "three", 0.7)]),
            ],
            config(),
        );
        let opts = RetrieveOptions {
            mmq: Some(2),
            ..Default::default()
        };
        // punctuation makes the light-normalized variant distinct
        let docs = r.retrieve("Hello, World!", &opts).await.unwrap();
        let ids: Vec<&str> = docs.iter().filter_map(|d| d.chunk_id.as_deref()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn test_merge_cap_is_top_k_times_variants() {
        let many: Vec<SearchHit> = (0..5).map(|i| hit(&format!("a{i}"), "x", 0.5)).collect();
        let many2: Vec<SearchHit> = (0..5).map(|i| hit(&format!("b{i}"), "y", 0.5)).collect();
        let mut cfg = config();
        cfg.top_k = 2;
        let (r, _backend) = retriever(vec![Ok(many), Ok(many2)], cfg);
        let opts = RetrieveOptions {
            mmq: Some(2),
            top_k: Some(2),
            ..Default::default()
        };
        let docs = r.retrieve("Hello, World!", &opts).await.unwrap();
        // capped at top_k * |variants| = 4
        assert_eq!(docs.len(), 4);
    }

    #[tokio::test]
    async fn test_single_variant_when_mmq_one() {
        let (r, backend) = retriever(vec![Ok(vec![hit("c1", "one", 0.9)])], config());
        let opts = RetrieveOptions {
            mmq: Some(1),
            ..Default::default()
        };
        let docs = r.retrieve("hello world", &opts).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(backend.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_hit_mapping_annotates_signals() {
        let (r, _backend) = retriever(vec![Ok(vec![hit("c1", "body text", 0.42)])], config());
        let opts = RetrieveOptions {
            mmq: Some(1),
            ..Default::default()
        };
        let docs = r.retrieve("hello", &opts).await.unwrap();
        let d = &docs[0];
        assert_eq!(d.page_content, "body text");
        assert_eq!(d.chunk_id.as_deref(), Some("c1"));
        assert_eq!(d.title.as_deref(), Some("file.pdf"));
        assert_eq!(d.meta_f64("score"), Some(0.42));
        assert_eq!(d.meta_str("weaviate_id"), Some("uuid-c1"));
        assert_eq!(d.meta_i64("__orig_rank"), Some(0));
        assert!(d.embedding_vector().is_some());
    }

    #[tokio::test]
    async fn test_schema_fallback_remembers_working_field() {
        let (r, backend) = retriever(
            vec![
                Err(Error::Schema("text".to_string())),
                Err(Error::Schema("page_content".to_string())),
                Ok(vec![hit("c1", "one", 0.9)]),
                Ok(vec![hit("c2", "two", 0.8)]),
            ],
            config(),
        );
        let opts = RetrieveOptions {
            mmq: Some(1),
            ..Default::default()
        };

        let docs = r.retrieve("hello", &opts).await.unwrap();
        assert_eq!(docs.len(), 1);
        // text -> page_content failed -> body worked
        assert_eq!(r.text_key(), "body");

        // subsequent calls start from the remembered field
        let _ = r.retrieve("again", &opts).await.unwrap();
        let requests = backend.requests.lock();
        assert_eq!(requests.last().unwrap().text_field, "body");
    }

    #[tokio::test]
    async fn test_schema_error_surfaces_when_all_fallbacks_fail() {
        let (r, _backend) = retriever(
            vec![
                Err(Error::Schema("text".to_string())),
                Err(Error::Schema("page_content".to_string())),
                Err(Error::Schema("body".to_string())),
                Err(Error::Schema("chunk".to_string())),
            ],
            config(),
        );
        let opts = RetrieveOptions {
            mmq: Some(1),
            ..Default::default()
        };
        let out = r.retrieve("hello", &opts).await;
        assert!(matches!(out, Err(Error::Schema(_))));
    }

    #[tokio::test]
    async fn test_backend_unavailable_not_retried() {
        let (r, backend) = retriever(
            vec![Err(Error::BackendUnavailable("down".to_string()))],
            config(),
        );
        let opts = RetrieveOptions {
            mmq: Some(1),
            ..Default::default()
        };
        let out = r.retrieve("hello", &opts).await;
        assert!(matches!(out, Err(Error::BackendUnavailable(_))));
        assert_eq!(backend.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_hybrid_request_carries_alpha_and_bm25_props() {
        let (r, backend) = retriever(vec![Ok(Vec::new())], config());
        let opts = RetrieveOptions {
            mmq: Some(1),
            alpha: Some(0.3),
            ..Default::default()
        };
        let _ = r.retrieve("hello", &opts).await.unwrap();
        let requests = backend.requests.lock();
        let req = &requests[0];
        assert_eq!(req.mode, SearchMode::Hybrid);
        assert_eq!(req.alpha, Some(0.3));
        assert!(req.distance.is_none());
        assert!(req.bm25_properties.contains(&"filename".to_string()));
    }

    #[tokio::test]
    async fn test_near_text_request_carries_distance_cap() {
        let (r, backend) = retriever(vec![Ok(Vec::new())], config());
        let opts = RetrieveOptions {
            mmq: Some(1),
            search_type: Some(SearchMode::NearText),
            ..Default::default()
        };
        let _ = r.retrieve("hello", &opts).await.unwrap();
        let requests = backend.requests.lock();
        let req = &requests[0];
        assert_eq!(req.mode, SearchMode::NearText);
        assert!(req.alpha.is_none());
        assert_eq!(req.distance, Some(0.7));
    }

    #[tokio::test]
    async fn test_filters_translated() {
        let (r, backend) = retriever(vec![Ok(Vec::new())], config());
        let mut filters = HashMap::new();
        filters.insert("filename".to_string(), json!("Guide"));
        let opts = RetrieveOptions {
            mmq: Some(1),
            filters: Some(filters),
            ..Default::default()
        };
        let _ = r.retrieve("hello", &opts).await.unwrap();
        let requests = backend.requests.lock();
        assert!(requests[0].filters.is_some());
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let (r, _backend) = retriever(vec![], config());
        let out = r.retrieve("  ", &RetrieveOptions::default()).await;
        assert!(matches!(out, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_dynamic_alpha_clamps() {
        let mut cfg = config();
        cfg.stopwords = Vec::new();
        cfg.alpha = 0.6;
        let (r, _backend) = retriever(vec![], cfg);

        // two rare tokens -> capped at multi_strong_max (0.45)
        assert!((r.dynamic_alpha("guide document") - 0.45).abs() < 1e-9);
        // one rare token -> floored at single_strong_min (0.55); base 0.6 already above
        assert!((r.dynamic_alpha("guide") - 0.6).abs() < 1e-9);
        // no tokens at all -> floored at no_bm25_min; base wins
        assert!((r.dynamic_alpha("!!") - 0.6).abs() < 1e-9);
    }
}
