//! Stream event payloads for RAG stage lifecycle
//!
//! Serialized with camelCase keys; unset fields are omitted. Non-finite
//! floats must never reach the wire, so every numeric setter filters them.

use serde::{Deserialize, Serialize};

/// Event payload for the retrieve stage
/// (`rag_retrieve.{in_progress,completed}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagSearchEvent {
    pub event: String,
    pub job_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hits: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub took_ms: Option<u64>,
}

/// Event payload for the rerank/mmr/compress stages
/// (`rag_rerank.*`, `rag_mmr.*`, `rag_compress.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagStageEvent {
    pub event: String,
    pub job_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub took_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_hits: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_hits: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reranker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_top_n: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_max_candidates: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_max_doc_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmr_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmr_fetch_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmr_lambda: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmr_similarity_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_context: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_llm: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heuristic_hits: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_applied: Option<bool>,
}

/// Drop non-finite floats before they reach a payload.
pub fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_event_camel_case_omits_none() {
        let event = RagSearchEvent {
            event: "rag_retrieve.completed".to_string(),
            job_id: "job-1".to_string(),
            user_id: "user-1".to_string(),
            session_id: None,
            query: Some("q".to_string()),
            hits: Some(3),
            took_ms: Some(12),
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["event"], "rag_retrieve.completed");
        assert_eq!(v["jobId"], "job-1");
        assert_eq!(v["userId"], "user-1");
        assert_eq!(v["hits"], 3);
        assert_eq!(v["tookMs"], 12);
        assert!(v.get("sessionId").is_none());
    }

    #[test]
    fn test_stage_event_field_names() {
        let event = RagStageEvent {
            event: "rag_rerank.completed".to_string(),
            job_id: "job-1".to_string(),
            user_id: "user-1".to_string(),
            input_hits: Some(5),
            output_hits: Some(3),
            rerank_top_n: Some(3),
            mmr_lambda: Some(0.7),
            ..Default::default()
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["inputHits"], 5);
        assert_eq!(v["outputHits"], 3);
        assert_eq!(v["rerankTopN"], 3);
        assert_eq!(v["mmrLambda"], 0.7);
        assert!(v.get("maxContext").is_none());
        assert!(v.get("heuristicHits").is_none());
    }

    #[test]
    fn test_finite_filter() {
        assert_eq!(finite(Some(0.5)), Some(0.5));
        assert_eq!(finite(Some(f64::NAN)), None);
        assert_eq!(finite(Some(f64::INFINITY)), None);
        assert_eq!(finite(None), None);
    }
}
