//! Per-request configuration overrides
//!
//! The request payload may carry a `rag` object with camelCase knobs that
//! take precedence over the configured defaults for a single run. Unknown
//! keys are ignored.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RagOverrides {
    pub top_k: Option<usize>,
    pub mmq: Option<usize>,
    pub filters: Option<HashMap<String, Value>>,
    pub search_type: Option<String>,
    pub alpha: Option<f64>,
    pub max_context: Option<usize>,
    pub use_llm: Option<bool>,
    pub mmr_k: Option<usize>,
    pub mmr_fetch_k: Option<usize>,
    pub mmr_lambda: Option<f64>,
    /// Absent means "use configured default"; an explicit `null` disables
    /// the similarity threshold for this request.
    #[serde(deserialize_with = "double_option")]
    pub mmr_similarity_threshold: Option<Option<f64>>,
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<f64>::deserialize(deserializer).map(Some)
}

impl RagOverrides {
    /// Parse the request's `rag` value; anything non-object yields the
    /// empty overrides.
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_camel_case_keys() {
        let overrides = RagOverrides::from_value(&json!({
            "topK": 5,
            "mmq": 2,
            "searchType": "near_text",
            "alpha": 0.3,
            "maxContext": 1200,
            "useLlm": true,
            "mmrK": 4,
            "mmrFetchK": 8,
            "mmrLambda": 0.5,
        }));
        assert_eq!(overrides.top_k, Some(5));
        assert_eq!(overrides.mmq, Some(2));
        assert_eq!(overrides.search_type.as_deref(), Some("near_text"));
        assert_eq!(overrides.alpha, Some(0.3));
        assert_eq!(overrides.max_context, Some(1200));
        assert_eq!(overrides.use_llm, Some(true));
        assert_eq!(overrides.mmr_k, Some(4));
        assert_eq!(overrides.mmr_fetch_k, Some(8));
        assert_eq!(overrides.mmr_lambda, Some(0.5));
    }

    #[test]
    fn test_null_similarity_threshold_distinct_from_absent() {
        let absent = RagOverrides::from_value(&json!({}));
        assert_eq!(absent.mmr_similarity_threshold, None);

        let null = RagOverrides::from_value(&json!({"mmrSimilarityThreshold": null}));
        assert_eq!(null.mmr_similarity_threshold, Some(None));

        let set = RagOverrides::from_value(&json!({"mmrSimilarityThreshold": 0.9}));
        assert_eq!(set.mmr_similarity_threshold, Some(Some(0.9)));
    }

    #[test]
    fn test_unknown_keys_ignored_and_garbage_is_empty() {
        let overrides = RagOverrides::from_value(&json!({"topK": 3, "unknown": "x"}));
        assert_eq!(overrides.top_k, Some(3));

        let overrides = RagOverrides::from_value(&json!("not-an-object"));
        assert!(overrides.top_k.is_none());
    }

    #[test]
    fn test_filters_passed_through() {
        let overrides = RagOverrides::from_value(&json!({"filters": {"filename": "guide"}}));
        let filters = overrides.filters.unwrap();
        assert_eq!(filters["filename"], json!("guide"));
    }
}
