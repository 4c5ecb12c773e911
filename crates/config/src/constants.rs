//! Centralized constants for retrieval and compression defaults

/// Retrieval defaults
pub mod rag {
    /// Initial retrieval size per query variant
    pub const DEFAULT_TOP_K: usize = 10;
    /// Number of query variants for multi-query expansion
    pub const DEFAULT_MMQ: usize = 3;
    /// Character budget for the packed context
    pub const DEFAULT_MAX_CONTEXT: usize = 3500;
    /// Hybrid weighting (0.0 = bm25 only, 1.0 = vector only)
    pub const DEFAULT_ALPHA: f64 = 0.6;
    /// near_text distance cap
    pub const NEAR_TEXT_DISTANCE: f64 = 0.7;

    /// Alternative text-field names tried when the configured one is
    /// missing from the collection schema.
    pub const FALLBACK_TEXT_KEYS: &[&str] = &["text", "page_content", "body", "chunk"];

    /// BM25 query properties for hybrid search
    pub const BM25_QUERY_PROPERTIES: &[&str] = &["text", "text_tri", "filename", "filename_kw"];
}

/// Compression defaults
pub mod compress {
    /// Embedding-filter thresholds tried in order until enough docs survive
    pub const ADAPTIVE_THRESHOLDS: [f64; 3] = [0.20, 0.10, 0.0];
    /// Minimum docs a threshold must keep before it is accepted
    pub const MIN_DOCS_AFTER_FILTER: usize = 2;
    /// Keyword-guard size
    pub const KEYWORD_KEEP_LIMIT: usize = 3;
    /// Docs kept when the budget trim would otherwise produce nothing
    pub const FALLBACK_KEEP: usize = 8;
    /// LLM tier triggers when surviving text exceeds this share of the budget
    pub const LLM_TRIGGER_RATIO: f64 = 0.7;
}

/// Korean stopword list applied during query tokenization.
///
/// Particles/endings, connectives, question fillers, and spoken fillers.
pub const KO_STOP_TOKENS: &[&str] = &[
    // 조사/어미
    "은", "는", "이", "가", "을", "를", "에", "에서", "에게", "께", "으로", "로", "과", "와", "도",
    "만", "까지", "부터", "의", "보다", "마저", "조차", "든지", "라고", "이라고", "까지의", "같은",
    "하는", "된", "하여", "하게", "하며",
    // 접속/불용
    "그리고", "그러나", "하지만", "또", "또는", "및", "또한", "그래서", "그러므로", "때문에",
    "때문", "즉", "예를", "들어",
    // 의문/감탄/형태 보정
    "무엇", "어떤", "왜", "어떻게", "하면", "해주세요", "해주세요.", "해줘", "알려줘", "대해",
    "관련", "것", "부분", "수", "대한",
    // 구두어/채움
    "음", "어", "어어", "어허", "자", "좀", "그", "저", "내", "너", "너희", "우리", "같아",
    "같은데", "요", "요.", "고마워",
];

/// Default system prompt for the RAG answer template.
pub const DEFAULT_RAG_PROMPT: &str = "당신은 친절하고 정확한 AI 어시스턴트입니다.\n\
- 제공된 Context만으로 답하세요.\n\
- Context는 여러 문서 조각으로 구성되어 있으며, 순서와 관계없이 모두 참고하세요.\n\
- 모르면 모른다고 말하세요.\n\
- 출처가 되는 문서 제목/섹션을 간단히 써주세요.\n\
- 출처가 없는 경우 출처를 표기하지 마세요.";
