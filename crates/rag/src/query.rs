//! Query normalization, tokenization, and multi-query expansion
//!
//! Queries mix Korean and ASCII technical vocabulary; normalization maps
//! Korean phonetic renderings of tech terms to their ASCII acronyms and
//! inserts boundaries between Hangul and ASCII runs so both lexical and
//! vector retrieval see consistent tokens.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Normalization depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeMode {
    /// NFC, aliases, lowercase, keep dashes, light punctuation cleanup
    Light,
    /// Additionally split Hangul/ASCII boundaries, collapse dashes, strip
    /// punctuation
    Full,
}

static HANGUL_ASCII_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([가-힣])([a-z0-9])").unwrap());
static ASCII_HANGUL_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z0-9])([가-힣])").unwrap());
static NON_WORD_FULL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());
static NON_WORD_LIGHT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s\-]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static ASCII_TOKEN_2: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]{2,}").unwrap());
static ASCII_TOKEN_3: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]{3,}").unwrap());
static HANGUL_TOKEN_2: Lazy<Regex> = Lazy::new(|| Regex::new(r"[가-힣]{2,}").unwrap());

/// Korean phonetic tech-term renderings mapped to ASCII acronyms.
static KO_TECH_ALIASES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(챗|쳇)\s*지\s*피\s*티", "chatgpt"),
        (r"(지|쥐)\s*피\s*티", "gpt"),
        (r"엘엘엠|엘\s*엘\s*엠", "llm"),
        (r"에이\s*아이", "ai"),
        (r"에이\s*피\s*아이", "api"),
        (r"유\s*아이", "ui"),
        (r"디\s*비", "db"),
        (r"에스\s*큐\s*엘", "sql"),
        (r"제이\s*에스\s*온|제이슨", "json"),
        (r"피\s*디\s*에프", "pdf"),
        (r"시\s*에스\s*브이", "csv"),
        (r"유\s*알\s*엘", "url"),
        (r"에이\s*더블유\s*에스|아마존\s*웹\s*서비스", "aws"),
    ]
    .iter()
    .map(|(pat, to)| (Regex::new(&format!("(?i){pat}")).unwrap(), *to))
    .collect()
});

/// Normalize common Korean technical terms to English acronyms
/// (e.g. `챗지피티` -> `chatgpt`, `엘엘엠` -> `llm`).
pub fn ko_tech_aliases(q: &str) -> String {
    let mut s = q.to_string();
    for (pattern, to) in KO_TECH_ALIASES.iter() {
        s = pattern.replace_all(&s, *to).into_owned();
    }
    s
}

/// Normalize a natural-language query.
pub fn normalize_query(q: &str, mode: NormalizeMode) -> String {
    let q: String = q.nfc().collect();
    let q = ko_tech_aliases(&q);
    let q = q.to_lowercase();

    let q = match mode {
        NormalizeMode::Full => {
            let q = HANGUL_ASCII_BOUNDARY.replace_all(&q, "$1 $2");
            let q = ASCII_HANGUL_BOUNDARY.replace_all(&q, "$1 $2");
            let q = q.replace('-', " ");
            NON_WORD_FULL.replace_all(&q, " ").into_owned()
        }
        NormalizeMode::Light => NON_WORD_LIGHT.replace_all(&q, " ").into_owned(),
    };

    WHITESPACE.replace_all(&q, " ").trim().to_string()
}

fn is_stopword(token: &str, stopwords: &[String]) -> bool {
    let lower = token.to_lowercase();
    stopwords
        .iter()
        .any(|s| s.trim().to_lowercase() == lower)
}

/// Extract ASCII/Korean tokens for lightweight keyword checks.
///
/// Returns lowercase tokens with stopwords removed.
pub fn kw_tokens(q: &str, stopwords: &[String]) -> Vec<String> {
    let nq = normalize_query(q, NormalizeMode::Full);
    let mut toks: Vec<String> = ASCII_TOKEN_2
        .find_iter(&nq)
        .map(|m| m.as_str().to_string())
        .collect();
    toks.extend(HANGUL_TOKEN_2.find_iter(&nq).map(|m| m.as_str().to_string()));
    toks.retain(|t| !is_stopword(t, stopwords));
    toks
}

/// Extract tokens and a rarer subset after stopword filtering.
///
/// Returns `(all_tokens, rare_tokens)` where rare = ASCII length >= 4 or
/// Hangul length >= 3.
pub fn kw_tokens_split(q: &str, stopwords: &[String]) -> (Vec<String>, Vec<String>) {
    let nq = normalize_query(q, NormalizeMode::Full);
    let ascii_words: Vec<String> = ASCII_TOKEN_3
        .find_iter(&nq)
        .map(|m| m.as_str().to_string())
        .filter(|t| !is_stopword(t, stopwords))
        .collect();
    let korean_words: Vec<String> = HANGUL_TOKEN_2
        .find_iter(&nq)
        .map(|m| m.as_str().to_string())
        .filter(|t| !is_stopword(t, stopwords))
        .collect();

    let mut toks = ascii_words.clone();
    toks.extend(korean_words.clone());

    let mut rare: Vec<String> = ascii_words
        .into_iter()
        .filter(|w| w.chars().count() >= 4)
        .collect();
    rare.extend(korean_words.into_iter().filter(|w| w.chars().count() >= 3));

    (toks, rare)
}

/// Produce up to `mmq` query variants for retrieval fan-out.
///
/// Ordered and deduplicated: original, light-normalized, full-normalized,
/// rare tokens joined, all tokens joined. Returns `[q]` when `mmq <= 1`.
pub fn expand_queries(query: &str, mmq: usize, stopwords: &[String]) -> Vec<String> {
    if mmq <= 1 {
        return vec![query.to_string()];
    }

    let mut variants: Vec<String> = Vec::new();
    let mut add = |q: String| {
        let text = q.trim().to_string();
        if !text.is_empty() && !variants.contains(&text) {
            variants.push(text);
        }
    };

    add(query.to_string());
    add(normalize_query(query, NormalizeMode::Light));
    add(normalize_query(query, NormalizeMode::Full));
    let (toks, rare) = kw_tokens_split(query, stopwords);
    if !rare.is_empty() {
        add(rare.join(" "));
    }
    if !toks.is_empty() {
        add(toks.join(" "));
    }

    variants.truncate(mmq.max(1));
    variants
}
