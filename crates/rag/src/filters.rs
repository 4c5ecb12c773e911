//! App-level filter translation

use std::collections::HashMap;

use serde_json::Value;

use chat_worker_core::WhereFilter;

/// Convert app-level filters into the backend `where` tree.
///
/// Rules:
/// - Strings -> case-insensitive partial matching via `TextContains`
/// - Numbers/bools -> `Equal` with the corresponding value type
/// - Lists -> `Or` of each item following the rules above
/// - Multiple top-level keys -> `And`
pub fn normalize_filters(filters: &HashMap<String, Value>) -> Option<WhereFilter> {
    if filters.is_empty() {
        return None;
    }

    let mut keys: Vec<&String> = filters.keys().collect();
    keys.sort();

    let mut ops = Vec::new();
    for key in keys {
        let value = &filters[key];
        match value {
            Value::Array(items) => {
                let sub: Vec<WhereFilter> = items
                    .iter()
                    .map(|item| leaf_filter(key, item))
                    .collect();
                if !sub.is_empty() {
                    ops.push(WhereFilter::Or { operands: sub });
                }
            }
            other => ops.push(leaf_filter(key, other)),
        }
    }

    match ops.len() {
        0 => None,
        1 => ops.pop(),
        _ => Some(WhereFilter::And { operands: ops }),
    }
}

fn leaf_filter(key: &str, value: &Value) -> WhereFilter {
    match value {
        Value::Bool(b) => WhereFilter::EqualBool {
            path: key.to_string(),
            value: *b,
        },
        Value::Number(n) => WhereFilter::EqualNumber {
            path: key.to_string(),
            value: n.as_f64().unwrap_or(0.0),
        },
        other => {
            let text = match other {
                Value::String(s) => s.clone(),
                v => v.to_string(),
            };
            WhereFilter::TextContains {
                path: key.to_string(),
                value: text.to_lowercase(),
            }
        }
    }
}
