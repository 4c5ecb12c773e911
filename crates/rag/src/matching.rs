//! Lightweight keyword matching against documents

use chat_worker_core::Document;

/// Count total occurrences of tokens in the given text (case-insensitive).
pub fn count_hits(toks: &[String], text: &str) -> usize {
    if toks.is_empty() || text.is_empty() {
        return 0;
    }
    let low = text.to_lowercase();
    toks.iter()
        .filter(|t| !t.is_empty())
        .map(|t| low.matches(&t.to_lowercase()).count())
        .sum()
}

/// True if any token appears in the document text or filename metadata
/// (substring match).
pub fn kw_hit(toks: &[String], d: &Document) -> bool {
    let fname = d.meta_str("filename").unwrap_or("");
    let fname_kw = d.meta_str("filename_kw").unwrap_or("");
    let blob = format!("{} {} {}", d.page_content, fname, fname_kw).to_lowercase();
    toks.iter()
        .filter(|t| !t.is_empty())
        .any(|t| blob.contains(&t.to_lowercase()))
}
