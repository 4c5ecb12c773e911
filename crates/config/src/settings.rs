//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{compress, rag, DEFAULT_RAG_PROMPT, KO_STOP_TOKENS};
use crate::ConfigError;

/// Retrieval operator, mirrored from the core search port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    #[default]
    Hybrid,
    NearText,
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Retrieval configuration
    #[serde(default)]
    pub rag: RagSettings,

    /// Reranker configuration
    #[serde(default)]
    pub rerank: RerankSettings,

    /// Two-tier compressor configuration
    #[serde(default)]
    pub compress: CompressSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// RAG retrieval and prompt knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagSettings {
    /// Vector collection name
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Property holding the chunk body
    #[serde(default = "default_text_key")]
    pub text_key: String,

    /// Initial retrieval size per query variant
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Number of query variants for multi-query expansion
    #[serde(default = "default_mmq")]
    pub mmq: usize,

    /// Character budget for the packed context
    #[serde(default = "default_max_context")]
    pub max_context: usize,

    #[serde(default)]
    pub search_type: SearchType,

    /// Hybrid weighting (0.0 = bm25 only, 1.0 = vector only)
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    // Dynamic-alpha bounds; all optional, the heuristic is skipped when unset
    #[serde(default = "default_alpha_multi_strong_max")]
    pub alpha_multi_strong_max: Option<f64>,
    #[serde(default = "default_alpha_single_strong_min")]
    pub alpha_single_strong_min: Option<f64>,
    #[serde(default = "default_alpha_weak_hit_min")]
    pub alpha_weak_hit_min: Option<f64>,
    #[serde(default = "default_alpha_no_bm25_min")]
    pub alpha_no_bm25_min: Option<f64>,

    /// near_text distance cap
    #[serde(default = "default_near_text_distance")]
    pub near_text_distance: f64,

    /// BM25 query properties for hybrid search
    #[serde(default = "default_bm25_properties")]
    pub bm25_query_properties: Vec<String>,

    /// Alternative text-field names for the schema fallback pass
    #[serde(default = "default_fallback_text_keys")]
    pub fallback_text_keys: Vec<String>,

    /// Stopwords removed during query tokenization
    #[serde(default = "default_ko_stop_tokens")]
    pub ko_stop_tokens: Vec<String>,

    /// System prompt for the answer template
    #[serde(default = "default_rag_prompt")]
    pub rag_prompt: String,

    /// MMR selection size; `None` keeps every input doc
    #[serde(default)]
    pub mmr_k: Option<usize>,
    /// MMR candidate window; `None` follows the input size
    #[serde(default)]
    pub mmr_fetch_k: Option<usize>,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda_mult: f64,
    #[serde(default = "default_mmr_similarity_threshold")]
    pub mmr_similarity_threshold: Option<f64>,

    /// Whether the LLM compression tier may run
    #[serde(default)]
    pub use_llm: bool,

    /// Deadline for a single backend call, in milliseconds
    #[serde(default)]
    pub search_timeout_ms: Option<u64>,
}

fn default_collection() -> String {
    "Chunks".to_string()
}
fn default_text_key() -> String {
    "text".to_string()
}
fn default_top_k() -> usize {
    rag::DEFAULT_TOP_K
}
fn default_mmq() -> usize {
    rag::DEFAULT_MMQ
}
fn default_max_context() -> usize {
    rag::DEFAULT_MAX_CONTEXT
}
fn default_alpha() -> f64 {
    rag::DEFAULT_ALPHA
}
fn default_alpha_multi_strong_max() -> Option<f64> {
    Some(0.45)
}
fn default_alpha_single_strong_min() -> Option<f64> {
    Some(0.55)
}
fn default_alpha_weak_hit_min() -> Option<f64> {
    Some(0.30)
}
fn default_alpha_no_bm25_min() -> Option<f64> {
    Some(0.10)
}
fn default_near_text_distance() -> f64 {
    rag::NEAR_TEXT_DISTANCE
}
fn default_bm25_properties() -> Vec<String> {
    rag::BM25_QUERY_PROPERTIES
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_fallback_text_keys() -> Vec<String> {
    rag::FALLBACK_TEXT_KEYS
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_ko_stop_tokens() -> Vec<String> {
    KO_STOP_TOKENS.iter().map(|s| s.to_string()).collect()
}
fn default_rag_prompt() -> String {
    DEFAULT_RAG_PROMPT.to_string()
}
fn default_mmr_lambda() -> f64 {
    0.7
}
fn default_mmr_similarity_threshold() -> Option<f64> {
    Some(0.85)
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            text_key: default_text_key(),
            top_k: default_top_k(),
            mmq: default_mmq(),
            max_context: default_max_context(),
            search_type: SearchType::default(),
            alpha: default_alpha(),
            alpha_multi_strong_max: default_alpha_multi_strong_max(),
            alpha_single_strong_min: default_alpha_single_strong_min(),
            alpha_weak_hit_min: default_alpha_weak_hit_min(),
            alpha_no_bm25_min: default_alpha_no_bm25_min(),
            near_text_distance: default_near_text_distance(),
            bm25_query_properties: default_bm25_properties(),
            fallback_text_keys: default_fallback_text_keys(),
            ko_stop_tokens: default_ko_stop_tokens(),
            rag_prompt: default_rag_prompt(),
            mmr_k: None,
            mmr_fetch_k: None,
            mmr_lambda_mult: default_mmr_lambda(),
            mmr_similarity_threshold: default_mmr_similarity_threshold(),
            use_llm: false,
            search_timeout_ms: None,
        }
    }
}

/// LLM reranker knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankSettings {
    /// Hard cap of retrieved candidates considered (0 disables the cap)
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Docs kept after reranking (0 = no cap)
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// LLM call batching
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Per-doc content trimming in characters
    #[serde(default = "default_max_doc_chars")]
    pub max_doc_chars: usize,

    #[serde(default)]
    pub temperature: f64,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// On failure, return input order instead of surfacing the error
    #[serde(default = "default_true")]
    pub fail_open: bool,

    /// Deadline for a single rerank batch, in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_max_candidates() -> usize {
    30
}
fn default_top_n() -> usize {
    8
}
fn default_batch_size() -> usize {
    12
}
fn default_max_doc_chars() -> usize {
    1800
}
fn default_max_output_tokens() -> u32 {
    600
}
fn default_true() -> bool {
    true
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
            top_n: default_top_n(),
            batch_size: default_batch_size(),
            max_doc_chars: default_max_doc_chars(),
            temperature: 0.0,
            max_output_tokens: default_max_output_tokens(),
            fail_open: true,
            timeout_ms: None,
        }
    }
}

/// Two-tier compressor knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressSettings {
    /// Extract verbatim only (safer for citations) vs rewrite-preserving-facts
    #[serde(default = "default_true")]
    pub extract_only: bool,

    #[serde(default = "default_per_doc_max_chars")]
    pub per_doc_max_chars: usize,

    #[serde(default = "default_output_max_chars")]
    pub output_max_chars: usize,

    /// Outputs shorter than this fall back to the original doc
    #[serde(default = "default_min_keep_chars")]
    pub min_keep_chars: usize,

    /// Model label recorded in `compress_model`
    #[serde(default = "default_compress_model")]
    pub model: String,

    #[serde(default = "default_true")]
    pub fail_open: bool,

    // Heuristic tier knobs
    #[serde(default = "default_keyword_keep_limit")]
    pub keyword_keep_limit: usize,
    #[serde(default = "default_min_docs_after_filter")]
    pub min_docs_after_filter: usize,
    #[serde(default = "default_fallback_keep")]
    pub fallback_keep: usize,
    #[serde(default = "default_llm_trigger_ratio")]
    pub llm_trigger_ratio: f64,
}

fn default_per_doc_max_chars() -> usize {
    3500
}
fn default_output_max_chars() -> usize {
    1200
}
fn default_min_keep_chars() -> usize {
    40
}
fn default_compress_model() -> String {
    "llm-compress".to_string()
}
fn default_keyword_keep_limit() -> usize {
    compress::KEYWORD_KEEP_LIMIT
}
fn default_min_docs_after_filter() -> usize {
    compress::MIN_DOCS_AFTER_FILTER
}
fn default_fallback_keep() -> usize {
    compress::FALLBACK_KEEP
}
fn default_llm_trigger_ratio() -> f64 {
    compress::LLM_TRIGGER_RATIO
}

impl Default for CompressSettings {
    fn default() -> Self {
        Self {
            extract_only: true,
            per_doc_max_chars: default_per_doc_max_chars(),
            output_max_chars: default_output_max_chars(),
            min_keep_chars: default_min_keep_chars(),
            model: default_compress_model(),
            fail_open: true,
            keyword_keep_limit: default_keyword_keep_limit(),
            min_docs_after_filter: default_min_docs_after_filter(),
            fallback_keep: default_fallback_keep(),
            llm_trigger_ratio: default_llm_trigger_ratio(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default tracing filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from an optional TOML file plus environment variables.
    ///
    /// Environment variables use the `CHAT_WORKER_` prefix with `__`
    /// nesting (e.g. `CHAT_WORKER_RAG__TOP_K=20`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.display().to_string()));
            }
            builder = builder.add_source(File::from(path));
        }

        let cfg = builder
            .add_source(Environment::with_prefix("CHAT_WORKER").separator("__"))
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.rag.alpha) {
            return Err(ConfigError::InvalidValue {
                field: "rag.alpha".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", self.rag.alpha),
            });
        }

        if !(0.0..=1.0).contains(&self.rag.mmr_lambda_mult) {
            return Err(ConfigError::InvalidValue {
                field: "rag.mmr_lambda_mult".to_string(),
                message: format!(
                    "Must be between 0.0 and 1.0, got {}",
                    self.rag.mmr_lambda_mult
                ),
            });
        }

        if self.rag.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rag.top_k".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if let Some(th) = self.rag.mmr_similarity_threshold {
            if !(0.0..=1.0).contains(&th) {
                return Err(ConfigError::InvalidValue {
                    field: "rag.mmr_similarity_threshold".to_string(),
                    message: format!("Must be between 0.0 and 1.0, got {th}"),
                });
            }
        }

        if !(0.0..=1.0).contains(&self.compress.llm_trigger_ratio) {
            return Err(ConfigError::InvalidValue {
                field: "compress.llm_trigger_ratio".to_string(),
                message: format!(
                    "Must be between 0.0 and 1.0, got {}",
                    self.compress.llm_trigger_ratio
                ),
            });
        }

        Ok(())
    }
}

/// Helper for dependency injection in tests or entrypoints.
pub fn load_settings() -> Result<Settings, ConfigError> {
    Settings::load(None)
}
