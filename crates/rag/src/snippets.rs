//! Context snippet extraction around keyword hits

/// Extract context snippets around token hits; fall back to the head of the
/// text if no hits.
///
/// Behavior:
/// - Find token hit positions (case-insensitive)
/// - Build windows around hits and merge overlaps
/// - Trim lightly to sentence boundaries when possible
pub fn extract_snippets(
    toks: &[String],
    text: &str,
    max_len: usize,
    max_snippets: usize,
) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let low = text.to_lowercase();
    let chars: Vec<char> = text.chars().collect();
    let low_chars: Vec<char> = low.chars().collect();

    // Hit positions in char offsets
    let mut hits: Vec<usize> = Vec::new();
    for t in toks {
        if t.is_empty() {
            continue;
        }
        let needle: Vec<char> = t.to_lowercase().chars().collect();
        if needle.is_empty() || needle.len() > low_chars.len() {
            continue;
        }
        for start in 0..=(low_chars.len() - needle.len()) {
            if low_chars[start..start + needle.len()] == needle[..] {
                hits.push(start);
            }
        }
    }

    if hits.is_empty() {
        let head: Vec<&str> = text.trim().lines().take(3).collect();
        let head_text: String = head.join(" ").chars().take(max_len).collect();
        if head_text.is_empty() {
            return vec![text.chars().take(max_len).collect()];
        }
        return vec![head_text];
    }

    hits.sort_unstable();
    let half = max_len / 2;
    let mut windows: Vec<(usize, usize)> = Vec::new();
    for pos in hits {
        let start = pos.saturating_sub(half);
        let end = (pos + half).min(chars.len());
        match windows.last_mut() {
            Some(last) if start <= last.1 + 10 => last.1 = last.1.max(end),
            _ => windows.push((start, end)),
        }
    }

    windows
        .into_iter()
        .take(max_snippets)
        .map(|(s, e)| {
            let mut chunk: String = chars[s..e].iter().collect();
            // light sentence boundary trim
            let left = chunk.find(". ").max(chunk.find('\n'));
            if let Some(left) = left {
                if left > 0 && left < chunk.len() - 1 {
                    chunk = chunk[left + 1..].to_string();
                }
            }
            let right = chunk.rfind(". ").max(chunk.rfind('\n'));
            if let Some(right) = right {
                if right > 0 && right < chunk.len() - 1 {
                    chunk = chunk[..=right].to_string();
                }
            }
            chunk.trim().to_string()
        })
        .collect()
}
